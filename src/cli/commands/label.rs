use clap::Subcommand;

use super::{nudge_sync, Ctx};

#[derive(Subcommand, Debug)]
pub enum LabelCmd {
    /// Attach a label (idempotent).
    Add { id: String, label: String },
    /// Remove a label.
    Rm { id: String, label: String },
}

pub fn run(ctx: &Ctx, cmd: &LabelCmd) -> crate::Result<()> {
    let mut store = ctx.open_store()?;
    match cmd {
        LabelCmd::Add { id, label } => {
            store.add_label(id, label)?;
            if !ctx.json {
                println!("labeled {id} with {label}");
            }
        }
        LabelCmd::Rm { id, label } => {
            store.remove_label(id, label)?;
            if !ctx.json {
                println!("removed {label} from {id}");
            }
        }
    }
    if ctx.json {
        let (LabelCmd::Add { id, .. } | LabelCmd::Rm { id, .. }) = cmd;
        let issue = store.get_issue(id)?;
        println!("{}", serde_json::to_string_pretty(&issue).unwrap_or_default());
    }
    nudge_sync(ctx);
    Ok(())
}
