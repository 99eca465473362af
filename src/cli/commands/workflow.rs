//! Workflow transitions, one subcommand per edge of the state machine.

use super::{nudge_sync, Ctx};
use crate::model::Issue;

pub fn start(ctx: &Ctx, id: &str) -> crate::Result<()> {
    let mut store = ctx.open_store()?;
    let issue = store.start_issue(id, &Ctx::actor())?;
    report(ctx, &issue);
    nudge_sync(ctx);
    Ok(())
}

pub fn done(ctx: &Ctx, id: &str) -> crate::Result<()> {
    let mut store = ctx.open_store()?;
    let issue = store.finish_issue(id)?;
    report(ctx, &issue);
    nudge_sync(ctx);
    Ok(())
}

pub fn close(ctx: &Ctx, id: &str, reason: &str) -> crate::Result<()> {
    let mut store = ctx.open_store()?;
    let issue = store.close_issue(id, reason)?;
    report(ctx, &issue);
    nudge_sync(ctx);
    Ok(())
}

pub fn reopen(ctx: &Ctx, id: &str, reason: Option<&str>) -> crate::Result<()> {
    let mut store = ctx.open_store()?;
    let issue = store.reopen_issue(id, reason)?;
    report(ctx, &issue);
    nudge_sync(ctx);
    Ok(())
}

fn report(ctx: &Ctx, issue: &Issue) {
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(issue).unwrap_or_default());
    } else {
        println!("{} is now {}", issue.id, issue.status);
    }
}
