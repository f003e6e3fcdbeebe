use anyhow::Result;
use colored::Colorize;

use super::{GlobalArgs, Workspace};

/// Delete the sandbox behind a session and forget the session.
pub async fn run(args: &GlobalArgs, session_id: &str) -> Result<()> {
    let workspace = Workspace::open(args)?;

    if !workspace
        .store()
        .list(&workspace.project.project_id)
        .iter()
        .any(|(id, _)| id == session_id)
    {
        println!(
            "\n{} No sandbox recorded for session {}.",
            "ℹ".blue(),
            session_id.cyan()
        );
        return Ok(());
    }

    let registry = workspace.registry(args.api_key.clone())?;
    registry
        .teardown(session_id, &workspace.project.project_id)
        .await?;

    println!(
        "{} Sandbox for session {} deleted.",
        "✓".green(),
        session_id.cyan()
    );
    Ok(())
}
