use clap::Args;

use super::{print_issue_line, Ctx};
use crate::model::Status;
use crate::store::ListFilter;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// todo | in_progress | done | closed
    #[arg(long, value_parser = Status::parse)]
    pub status: Option<Status>,

    #[arg(long)]
    pub assignee: Option<String>,

    #[arg(long)]
    pub label: Option<String>,
}

pub fn run(ctx: &Ctx, args: &ListArgs) -> crate::Result<()> {
    let filter = ListFilter {
        status: args.status,
        assignee: args.assignee.clone(),
        label: args.label.clone(),
    };

    let store = ctx.open_store()?;
    let issues = store.list_issues(&filter)?;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&issues).unwrap_or_default());
        return Ok(());
    }
    for issue in &issues {
        print_issue_line(issue);
    }
    if issues.is_empty() {
        println!("no issues");
    }
    Ok(())
}
