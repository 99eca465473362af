use clap::Args;

use super::{nudge_sync, Ctx};
use crate::model::IssueKind;

#[derive(Args, Debug)]
pub struct NewArgs {
    pub title: String,

    /// task | bug | feature | epic
    #[arg(long, default_value = "task", value_parser = IssueKind::parse)]
    pub kind: IssueKind,

    #[arg(long)]
    pub assignee: Option<String>,

    /// May be repeated.
    #[arg(long = "label", value_name = "LABEL")]
    pub labels: Vec<String>,
}

pub fn run(ctx: &Ctx, args: &NewArgs) -> crate::Result<()> {
    let mut store = ctx.open_store()?;
    let issue = store.create_issue(
        &args.title,
        args.kind,
        args.assignee.as_deref(),
        &args.labels,
    )?;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&issue).unwrap_or_default());
    } else {
        println!("created {}: {}", issue.id, issue.title);
    }
    nudge_sync(ctx);
    Ok(())
}
