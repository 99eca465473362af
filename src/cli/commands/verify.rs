use super::Ctx;

/// `tick verify`: integrity check plus a quick census. The recovery step
/// after an unclean shutdown.
pub fn run(ctx: &Ctx) -> crate::Result<()> {
    let store = ctx.open_store()?;
    store.verify_integrity()?;
    let issues = store.count_issues()?;

    if ctx.json {
        println!(
            "{}",
            serde_json::json!({ "ok": true, "issues": issues })
        );
    } else {
        println!("ok: integrity verified, {issues} issues");
    }
    Ok(())
}
