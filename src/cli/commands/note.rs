use clap::Subcommand;

use super::{nudge_sync, Ctx};

#[derive(Subcommand, Debug)]
pub enum NoteCmd {
    /// Append a note to an issue.
    Add { id: String, text: String },
    /// List an issue's notes in creation order.
    List { id: String },
}

pub fn run(ctx: &Ctx, cmd: &NoteCmd) -> crate::Result<()> {
    match cmd {
        NoteCmd::Add { id, text } => {
            let mut store = ctx.open_store()?;
            let note = store.add_note(id, text)?;
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&note).unwrap_or_default());
            } else {
                println!("noted on {id}");
            }
            nudge_sync(ctx);
        }
        NoteCmd::List { id } => {
            let store = ctx.open_store()?;
            let notes = store.notes(id)?;
            if ctx.json {
                println!("{}", serde_json::to_string_pretty(&notes).unwrap_or_default());
            } else if notes.is_empty() {
                println!("no notes");
            } else {
                for note in &notes {
                    println!("- {}", note.content);
                }
            }
        }
    }
    Ok(())
}
