//! Foreground and background command execution.
//!
//! Background commands go to one named command session per conversation
//! session, so repeated background calls share a channel instead of
//! creating one each.

use tracing::{debug, info, warn};

use crate::sandbox::{CommandOutput, RemoteSandbox, SandboxResult};

/// A command submitted to a background session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BackgroundCommand {
    pub exec_session_id: String,
    pub command_id: String,
}

/// Background channel id for a conversation session.
pub(crate) fn exec_session_id(session_id: &str) -> String {
    format!("exec-session-{session_id}")
}

/// Runs a command to completion.
pub(crate) async fn run_foreground(
    sandbox: &dyn RemoteSandbox,
    command: &str,
) -> SandboxResult<CommandOutput> {
    debug!("Executing in sandbox {}: {}", sandbox.id(), command);
    sandbox.execute_command(command).await
}

/// Submits a command to the session's background channel and returns
/// without waiting for it.
pub(crate) async fn run_background(
    sandbox: &dyn RemoteSandbox,
    session_id: &str,
    command: &str,
) -> SandboxResult<BackgroundCommand> {
    let exec_session_id = exec_session_id(session_id);

    if let Err(e) = sandbox.get_session(&exec_session_id).await {
        warn!("Exec session {} not found ({}), creating", exec_session_id, e);
        sandbox.create_session(&exec_session_id).await?;
    }

    let command_id = sandbox
        .execute_session_command(&exec_session_id, command, true)
        .await?;

    info!(
        "Started background command {} in {}",
        command_id, exec_session_id
    );

    Ok(BackgroundCommand {
        exec_session_id,
        command_id,
    })
}
