pub mod daemon;
pub mod dep;
pub mod init;
pub mod label;
pub mod list;
pub mod new;
pub mod note;
pub mod remote;
pub mod show;
pub mod verify;
pub mod workflow;

use super::Ctx;
use crate::daemon::ipc::{self, Request};
use crate::daemon::registry;
use crate::model::Issue;

/// After a committed local mutation: make sure the daemon serves this
/// database and nudge a sync. Best-effort; the mutation is already durable
/// and the engine catches up from its cursor on the next opportunity.
pub(crate) fn nudge_sync(ctx: &Ctx) {
    let Some(url) = ctx.config.remote_url() else {
        return;
    };
    let nudged = registry::ensure_daemon(&ctx.db_path, Some(url))
        .map_err(crate::Error::from)
        .and_then(|_| {
            ipc::request_payload(&ctx.db_path, &Request::TriggerSync)
                .map_err(crate::Error::from)
        });
    if let Err(err) = nudged {
        tracing::debug!(error = %err, "background sync nudge failed");
    }
}

pub(crate) fn print_issue_line(issue: &Issue) {
    let assignee = issue.assignee.as_deref().unwrap_or("-");
    let labels = if issue.labels.is_empty() {
        String::new()
    } else {
        format!(" [{}]", issue.labels.join(", "))
    };
    println!(
        "{}  {:<11}  {:<8}  {:<12}  {}{}",
        issue.id, issue.status, issue.kind, assignee, issue.title, labels
    );
}
