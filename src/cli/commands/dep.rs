use clap::Subcommand;

use super::{nudge_sync, print_issue_line, Ctx};
use crate::model::{self, DepKind, TreeRow};
use crate::store::ListFilter;

#[derive(Subcommand, Debug)]
pub enum DepCmd {
    /// Add a typed edge `from -> to`.
    Add {
        from: String,
        to: String,
        /// blocks | contains
        #[arg(long, default_value = "blocks", value_parser = DepKind::parse)]
        kind: DepKind,
    },
    /// Print the dependency tree rooted at an issue.
    Tree { id: String },
}

pub fn run(ctx: &Ctx, cmd: &DepCmd) -> crate::Result<()> {
    match cmd {
        DepCmd::Add { from, to, kind } => {
            let mut store = ctx.open_store()?;
            store.add_dep(from, to, *kind)?;
            if !ctx.json {
                println!("{from} {kind} {to}");
            }
            nudge_sync(ctx);
        }
        DepCmd::Tree { id } => {
            let store = ctx.open_store()?;
            // Root must exist; edges may reference ids we only know as stubs.
            store.get_issue(id)?;
            let edges = store.deps()?;
            let rows = model::dep_tree(id, &edges);
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&rows).unwrap_or_default());
            } else {
                for row in &rows {
                    print_tree_row(row);
                }
            }
        }
    }
    Ok(())
}

fn print_tree_row(row: &TreeRow) {
    let indent = "  ".repeat(row.depth);
    let kind = row
        .kind
        .map(|k| format!("{k} "))
        .unwrap_or_default();
    let cycle = if row.cycle { " (cycle)" } else { "" };
    println!("{indent}{kind}{}{cycle}", row.id);
}

/// `tick blocked`: open issues with an unsettled incoming `blocks` edge.
pub fn blocked(ctx: &Ctx) -> crate::Result<()> {
    let store = ctx.open_store()?;
    let edges = store.deps()?;
    let issues = store.list_issues(&ListFilter::default())?;

    let blocked: Vec<_> = issues
        .iter()
        .filter(|issue| !issue.status.is_settled())
        .filter(|issue| {
            model::is_blocked(&issue.id, &edges, |other| {
                issues.iter().find(|i| i.id == other).map(|i| i.status)
            })
        })
        .collect();

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&blocked).unwrap_or_default());
        return Ok(());
    }
    for issue in &blocked {
        print_issue_line(issue);
    }
    if blocked.is_empty() {
        println!("nothing blocked");
    }
    Ok(())
}
