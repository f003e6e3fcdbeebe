use anyhow::{bail, Context, Result};

use super::{GlobalArgs, Workspace};
use crate::tools::ToolCall;

/// Run a single tool call for a session and print its output.
///
/// `call` is the same JSON a host sends, e.g.
/// `{"tool":"bash","args":{"command":"ls"}}`.
pub async fn run(args: &GlobalArgs, session_id: &str, call: &str) -> Result<()> {
    let call: ToolCall = serde_json::from_str(call).context("Invalid tool call")?;

    let workspace = Workspace::open(args)?;
    let registry = workspace.registry(args.api_key.clone())?;
    let toolbox = workspace.toolbox(registry);

    let result = toolbox.execute(session_id, call).await;
    if result.success {
        println!("{}", result.output);
        Ok(())
    } else {
        bail!(result.error.unwrap_or_else(|| "Tool failed".to_string()))
    }
}
