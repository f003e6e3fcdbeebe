use anyhow::{Context, Result};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};

use super::{GlobalArgs, Workspace};
use crate::protocol::handle_line;

/// Answer host requests on stdin until EOF or ctrl-c.
pub async fn run(args: &GlobalArgs) -> Result<()> {
    let workspace = Workspace::open(args)?;
    let registry = workspace.registry(args.api_key.clone())?;
    let toolbox = workspace.toolbox(registry.clone());
    let repo_path = workspace.config.sandbox.repo_path.clone();

    info!(
        "Serving project {} ({}), store at {}",
        workspace.project.project_id,
        workspace.project.worktree,
        registry.store().dir().display()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read request")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };

        let Some(line) = line else {
            info!("Host closed stdin");
            break;
        };

        let Some(response) = handle_line(&toolbox, &repo_path, &line).await else {
            continue;
        };

        let mut encoded = match serde_json::to_string(&response) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("Failed to encode response: {}", e);
                continue;
            }
        };
        encoded.push('\n');
        stdout
            .write_all(encoded.as_bytes())
            .await
            .context("Failed to write response")?;
        stdout.flush().await.context("Failed to flush stdout")?;
    }

    if workspace.config.lifecycle.delete_on_exit {
        registry
            .shutdown(Duration::from_secs(
                workspace.config.lifecycle.exit_timeout_secs,
            ))
            .await;
    }

    Ok(())
}
