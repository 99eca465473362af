use super::Ctx;
use crate::model;

pub fn run(ctx: &Ctx, id: &str) -> crate::Result<()> {
    let store = ctx.open_store()?;
    let issue = store.get_issue(id)?;
    let notes = store.notes(id)?;
    let edges = store.deps()?;
    let blocked = model::is_blocked(id, &edges, |other| {
        store.get_issue(other).ok().map(|i| i.status)
    });

    if ctx.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "issue": issue,
                "notes": notes,
                "blocked": blocked,
            }))
            .unwrap_or_default()
        );
        return Ok(());
    }

    println!("{} [{}] {}: {}", issue.id, issue.kind, issue.status, issue.title);
    if let Some(assignee) = &issue.assignee {
        println!("assignee: {assignee}");
    }
    if !issue.labels.is_empty() {
        println!("labels: {}", issue.labels.join(", "));
    }
    if blocked {
        println!("blocked: yes");
    }
    if !notes.is_empty() {
        println!("notes:");
        for note in &notes {
            println!("  - {}", note.content);
        }
    }
    Ok(())
}
