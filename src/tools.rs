//! Tool surface exposed to the host runtime.
//!
//! Every tool resolves the caller's session to a sandbox through the
//! registry, then runs against that sandbox. Session lifecycle events from
//! the host are routed straight to the registry.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::edit::{EditPair, RemoteFs};
use crate::exec::{run_background, run_foreground};
use crate::registry::SessionRegistry;
use crate::sandbox::SandboxResult;

const LSP_UNIMPLEMENTED: &str = "LSP operations are not yet implemented in the Daytona plugin.";

/// A tool invocation as sent by the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "tool", content = "args")]
pub(crate) enum ToolCall {
    #[serde(rename = "bash")]
    Bash {
        command: String,
        #[serde(default)]
        background: bool,
    },
    #[serde(rename = "read", rename_all = "camelCase")]
    Read { file_path: String },
    #[serde(rename = "write", rename_all = "camelCase")]
    Write { file_path: String, content: String },
    #[serde(rename = "edit", rename_all = "camelCase")]
    Edit {
        file_path: String,
        old_string: String,
        new_string: String,
    },
    #[serde(rename = "multiedit", rename_all = "camelCase")]
    MultiEdit {
        file_path: String,
        edits: Vec<EditPair>,
    },
    #[serde(rename = "patch", rename_all = "camelCase")]
    Patch {
        file_path: String,
        old_snippet: String,
        new_snippet: String,
    },
    #[serde(rename = "ls", rename_all = "camelCase")]
    Ls {
        #[serde(default)]
        dir_path: Option<String>,
    },
    #[serde(rename = "glob")]
    Glob { pattern: String },
    #[serde(rename = "grep")]
    Grep { pattern: String },
    #[serde(rename = "getPreviewURL")]
    PreviewUrl { port: u16 },
    #[serde(rename = "lsp", rename_all = "camelCase")]
    Lsp {
        op: String,
        file_path: String,
        line: u32,
    },
}

impl ToolCall {
    /// Tool name as the host knows it.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bash { .. } => "bash",
            Self::Read { .. } => "read",
            Self::Write { .. } => "write",
            Self::Edit { .. } => "edit",
            Self::MultiEdit { .. } => "multiedit",
            Self::Patch { .. } => "patch",
            Self::Ls { .. } => "ls",
            Self::Glob { .. } => "glob",
            Self::Grep { .. } => "grep",
            Self::PreviewUrl { .. } => "getPreviewURL",
            Self::Lsp { .. } => "lsp",
        }
    }
}

/// Outcome of a tool call or event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn err(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.to_string()),
        }
    }
}

/// Session lifecycle events emitted by the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum HostEvent {
    #[serde(rename = "session.deleted")]
    SessionDeleted { properties: DeletedProperties },
    #[serde(rename = "session.idle")]
    SessionIdle { properties: IdleProperties },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct DeletedProperties {
    pub info: SessionInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct SessionInfo {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct IdleProperties {
    #[serde(rename = "sessionID")]
    pub session_id: String,
}

/// Project identity the host runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ProjectContext {
    pub project_id: String,
    pub worktree: String,
}

/// Dispatches tool calls and events for one project.
pub(crate) struct Toolbox {
    registry: Arc<SessionRegistry>,
    project: ProjectContext,
}

impl Toolbox {
    pub fn new(registry: Arc<SessionRegistry>, project: ProjectContext) -> Self {
        Self { registry, project }
    }

    /// Run a tool for a session. Failures become unsuccessful results.
    pub async fn execute(&self, session_id: &str, call: ToolCall) -> ToolResult {
        let name = call.name();
        debug!("Tool {} for session {}", name, session_id);
        match self.run(session_id, call).await {
            Ok(output) => ToolResult::ok(output),
            Err(e) => {
                info!("Tool {} failed for session {}: {}", name, session_id, e);
                ToolResult::err(e)
            }
        }
    }

    async fn run(&self, session_id: &str, call: ToolCall) -> SandboxResult<String> {
        if let ToolCall::Lsp { op, file_path, line } = &call {
            debug!("LSP {} requested for {}:{}", op, file_path, line);
            return Ok(LSP_UNIMPLEMENTED.to_string());
        }

        let sandbox = self
            .registry
            .resolve(session_id, &self.project.project_id, &self.project.worktree)
            .await?;
        let fs = RemoteFs::new(sandbox.as_ref());

        let output = match call {
            ToolCall::Bash {
                command,
                background: true,
            } => {
                let started = run_background(sandbox.as_ref(), session_id, &command).await?;
                format!(
                    "Command started in background (cmdId: {})",
                    started.command_id
                )
            }
            ToolCall::Bash { command, .. } => {
                let result = run_foreground(sandbox.as_ref(), &command).await?;
                format!("Exit code: {}\n{}", result.exit_code, result.output)
            }
            ToolCall::Read { file_path } => fs.read(&file_path).await?,
            ToolCall::Write { file_path, content } => {
                let written = fs.write(&file_path, &content).await?;
                format!("Written {written} bytes to {file_path}")
            }
            ToolCall::Edit {
                file_path,
                old_string,
                new_string,
            } => {
                fs.edit(&file_path, &old_string, &new_string).await?;
                format!("Edited {file_path}")
            }
            ToolCall::MultiEdit { file_path, edits } => {
                fs.multi_edit(&file_path, &edits).await?;
                format!("Applied {} edits to {file_path}", edits.len())
            }
            ToolCall::Patch {
                file_path,
                old_snippet,
                new_snippet,
            } => {
                fs.patch(&file_path, &old_snippet, &new_snippet).await?;
                format!("Patched {file_path}")
            }
            ToolCall::Ls { dir_path } => fs.list(dir_path.as_deref()).await?.join("\n"),
            ToolCall::Glob { pattern } => fs.glob(&pattern).await?.join("\n"),
            ToolCall::Grep { pattern } => fs
                .grep(&pattern)
                .await?
                .iter()
                .map(|m| format!("{}:{}: {}", m.file, m.line, m.content))
                .collect::<Vec<_>>()
                .join("\n"),
            ToolCall::PreviewUrl { port } => {
                let url = sandbox.preview_url(port).await?;
                format!("Sandbox Preview URL: {url}")
            }
            ToolCall::Lsp { .. } => LSP_UNIMPLEMENTED.to_string(),
        };

        Ok(output)
    }

    /// React to a host lifecycle event.
    pub async fn handle_event(&self, event: HostEvent) -> ToolResult {
        match event {
            HostEvent::SessionDeleted { properties } => {
                let session_id = properties.info.id;
                match self
                    .registry
                    .teardown(&session_id, &self.project.project_id)
                    .await
                {
                    Ok(()) => ToolResult::ok("Sandbox deleted successfully."),
                    Err(e) => ToolResult::err(e),
                }
            }
            HostEvent::SessionIdle { properties } => {
                debug!("Session {} is idle", properties.session_id);
                ToolResult::ok("")
            }
            HostEvent::Other => ToolResult::ok(""),
        }
    }
}

/// Instructions appended to the host's system prompt.
pub(crate) fn system_prompt(repo_path: &str) -> String {
    [
        "## Daytona Sandbox Integration".to_string(),
        "This session is integrated with a Daytona sandbox.".to_string(),
        format!("The main project repository is located at: {repo_path}."),
        "Bash commands will run in this directory.".to_string(),
        "Put all projects in the project directory. Do NOT try to use the current working directory of the host system.".to_string(),
        "When executing long-running commands, use the 'background' option to run them asynchronously.".to_string(),
        "Before showing a preview URL, ensure the server is running in the sandbox on that port.".to_string(),
    ]
    .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::mock::{CallCounts, MockProvisioner};
    use crate::store::SessionStore;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    fn toolbox(mock: &MockProvisioner, dir: &TempDir) -> Toolbox {
        let registry = SessionRegistry::new(Arc::new(mock.clone()), SessionStore::new(dir.path()));
        Toolbox::new(
            Arc::new(registry),
            ProjectContext {
                project_id: "proj".to_string(),
                worktree: "/work".to_string(),
            },
        )
    }

    fn call(value: serde_json::Value) -> ToolCall {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_parse_tool_calls() {
        assert_eq!(
            call(json!({"tool": "bash", "args": {"command": "ls"}})),
            ToolCall::Bash {
                command: "ls".to_string(),
                background: false
            }
        );
        assert_eq!(
            call(json!({"tool": "multiedit", "args": {
                "filePath": "/a",
                "edits": [{"oldString": "x", "newString": "y"}]
            }})),
            ToolCall::MultiEdit {
                file_path: "/a".to_string(),
                edits: vec![EditPair {
                    old_string: "x".to_string(),
                    new_string: "y".to_string()
                }]
            }
        );
        assert_eq!(
            call(json!({"tool": "ls", "args": {}})),
            ToolCall::Ls { dir_path: None }
        );
        assert_eq!(
            call(json!({"tool": "getPreviewURL", "args": {"port": 3000}})).name(),
            "getPreviewURL"
        );
        assert!(serde_json::from_value::<ToolCall>(json!({"tool": "rm", "args": {}})).is_err());
    }

    #[test]
    fn test_parse_events() {
        let deleted: HostEvent = serde_json::from_value(json!({
            "type": "session.deleted",
            "properties": {"info": {"id": "s1", "title": "x"}}
        }))
        .unwrap();
        assert!(matches!(
            deleted,
            HostEvent::SessionDeleted { ref properties } if properties.info.id == "s1"
        ));

        let other: HostEvent =
            serde_json::from_value(json!({"type": "message.updated", "properties": {}})).unwrap();
        assert_eq!(other, HostEvent::Other);
    }

    #[tokio::test]
    async fn test_bash_foreground_and_background() {
        let dir = tempdir().unwrap();
        let mock = MockProvisioner::new();
        let tools = toolbox(&mock, &dir);

        let fg = tools
            .execute("s1", call(json!({"tool": "bash", "args": {"command": "echo hi"}})))
            .await;
        assert!(fg.success);
        assert_eq!(fg.output, "Exit code: 0\nhi\n");

        let bg_call = json!({"tool": "bash", "args": {"command": "npm run dev", "background": true}});
        let first = tools.execute("s1", call(bg_call.clone())).await;
        let second = tools.execute("s1", call(bg_call)).await;
        assert_eq!(first.output, "Command started in background (cmdId: cmd-1)");
        assert_eq!(second.output, "Command started in background (cmdId: cmd-2)");
        assert_eq!(CallCounts::load(&mock.calls.create_session), 1);
        assert_eq!(CallCounts::load(&mock.calls.create), 1);
    }

    #[tokio::test]
    async fn test_file_tools() {
        let dir = tempdir().unwrap();
        let mock = MockProvisioner::new();
        let tools = toolbox(&mock, &dir);

        let res = tools
            .execute(
                "s1",
                call(json!({"tool": "write", "args": {"filePath": "/home/daytona/a.txt", "content": "a"}})),
            )
            .await;
        assert_eq!(res.output, "Written 1 bytes to /home/daytona/a.txt");

        let res = tools
            .execute(
                "s1",
                call(json!({"tool": "multiedit", "args": {
                    "filePath": "/home/daytona/a.txt",
                    "edits": [{"oldString": "a", "newString": "b"}, {"oldString": "b", "newString": "c"}]
                }})),
            )
            .await;
        assert_eq!(res.output, "Applied 2 edits to /home/daytona/a.txt");

        let res = tools
            .execute(
                "s1",
                call(json!({"tool": "edit", "args": {
                    "filePath": "/home/daytona/a.txt", "oldString": "missing", "newString": "x"
                }})),
            )
            .await;
        assert!(res.success);
        assert_eq!(res.output, "Edited /home/daytona/a.txt");

        let res = tools
            .execute("s1", call(json!({"tool": "read", "args": {"filePath": "/home/daytona/a.txt"}})))
            .await;
        assert_eq!(res.output, "c");

        let res = tools
            .execute("s1", call(json!({"tool": "grep", "args": {"pattern": "c"}})))
            .await;
        assert_eq!(res.output, "/home/daytona/a.txt:1: c");

        let res = tools.execute("s1", call(json!({"tool": "ls", "args": {}}))).await;
        assert_eq!(res.output, "a.txt");
    }

    #[tokio::test]
    async fn test_grep_lists_one_match_per_line() {
        let dir = tempdir().unwrap();
        let mock = MockProvisioner::new();
        let tools = toolbox(&mock, &dir);

        for (path, content) in [("/home/daytona/a.rs", "fn a() {}\nlet x;"), ("/home/daytona/b.rs", "fn b() {}")] {
            let res = tools
                .execute(
                    "s1",
                    call(json!({"tool": "write", "args": {"filePath": path, "content": content}})),
                )
                .await;
            assert!(res.success);
        }

        let res = tools
            .execute("s1", call(json!({"tool": "grep", "args": {"pattern": "fn "}})))
            .await;
        assert_eq!(
            res.output,
            "/home/daytona/a.rs:1: fn a() {}\n/home/daytona/b.rs:1: fn b() {}"
        );
    }

    #[tokio::test]
    async fn test_transport_error_becomes_failed_result() {
        let dir = tempdir().unwrap();
        let mock = MockProvisioner::new();
        let tools = toolbox(&mock, &dir);

        let res = tools
            .execute("s1", call(json!({"tool": "read", "args": {"filePath": "/nope"}})))
            .await;

        assert!(!res.success);
        assert!(res.error.unwrap().contains("file not found: /nope"));
    }

    #[tokio::test]
    async fn test_resolve_failure_aborts_before_transfer() {
        let dir = tempdir().unwrap();
        let mock = MockProvisioner::unconfigured();
        let tools = toolbox(&mock, &dir);

        let res = tools
            .execute("s1", call(json!({"tool": "write", "args": {"filePath": "/a", "content": "x"}})))
            .await;

        assert!(!res.success);
        assert!(res.error.unwrap().contains("DAYTONA_API_KEY"));
        assert_eq!(CallCounts::load(&mock.calls.upload), 0);
    }

    #[tokio::test]
    async fn test_lsp_does_not_touch_provider() {
        let dir = tempdir().unwrap();
        let mock = MockProvisioner::unconfigured();
        let tools = toolbox(&mock, &dir);

        let res = tools
            .execute(
                "s1",
                call(json!({"tool": "lsp", "args": {"op": "hover", "filePath": "/a", "line": 1}})),
            )
            .await;

        assert!(res.success);
        assert!(res.output.contains("not yet implemented"));
        assert_eq!(CallCounts::load(&mock.calls.create), 0);
    }

    #[tokio::test]
    async fn test_preview_url() {
        let dir = tempdir().unwrap();
        let mock = MockProvisioner::new();
        let tools = toolbox(&mock, &dir);

        let res = tools
            .execute("s1", call(json!({"tool": "getPreviewURL", "args": {"port": 3000}})))
            .await;
        assert_eq!(
            res.output,
            "Sandbox Preview URL: https://3000-mock-1.proxy.example"
        );
    }

    #[tokio::test]
    async fn test_session_deleted_event_tears_down() {
        let dir = tempdir().unwrap();
        let mock = MockProvisioner::new();
        let tools = toolbox(&mock, &dir);

        tools
            .execute("s1", call(json!({"tool": "bash", "args": {"command": "echo"}})))
            .await;

        let event: HostEvent = serde_json::from_value(json!({
            "type": "session.deleted", "properties": {"info": {"id": "s1"}}
        }))
        .unwrap();
        let res = tools.handle_event(event.clone()).await;
        assert!(res.success);
        assert!(!mock.exists("mock-1"));

        // Second delete: nothing known, still fine
        let res = tools.handle_event(event).await;
        assert!(res.success);
        assert_eq!(CallCounts::load(&mock.calls.delete), 1);
    }

    #[test]
    fn test_system_prompt_mentions_repo_path() {
        let prompt = system_prompt("/home/daytona/project");
        assert!(prompt.starts_with("## Daytona Sandbox Integration"));
        assert!(prompt.contains("/home/daytona/project"));
        assert!(prompt.contains("'background'"));
    }
}
