//! Line-delimited JSON protocol spoken with the host runtime.
//!
//! One request per line in, exactly one response per line out:
//!
//! ```text
//! {"id":1,"type":"tool","sessionID":"s1","tool":"bash","args":{"command":"ls"}}
//! {"id":1,"success":true,"output":"Exit code: 0\n...","error":null}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::{system_prompt, HostEvent, ToolCall, ToolResult, Toolbox};

/// A request from the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Request {
    Tool {
        id: Value,
        #[serde(rename = "sessionID")]
        session_id: String,
        #[serde(flatten)]
        call: ToolCall,
    },
    Event {
        id: Value,
        event: HostEvent,
    },
    SystemPrompt {
        id: Value,
    },
}

/// Response written for every request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct Response {
    pub id: Value,
    #[serde(flatten)]
    pub result: ToolResult,
}

/// Parse and handle one line.
///
/// Returns `None` for blank lines. Unparseable lines get an error response
/// with a null id (or the id, if one could be recovered).
pub(crate) async fn handle_line(toolbox: &Toolbox, repo_path: &str, line: &str) -> Option<Response> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            let id = serde_json::from_str::<Value>(line)
                .ok()
                .and_then(|v| v.get("id").cloned())
                .unwrap_or(Value::Null);
            return Some(Response {
                id,
                result: ToolResult::err(format!("Invalid request: {e}")),
            });
        }
    };

    let response = match request {
        Request::Tool {
            id,
            session_id,
            call,
        } => Response {
            id,
            result: toolbox.execute(&session_id, call).await,
        },
        Request::Event { id, event } => Response {
            id,
            result: toolbox.handle_event(event).await,
        },
        Request::SystemPrompt { id } => Response {
            id,
            result: ToolResult::ok(system_prompt(repo_path)),
        },
    };

    Some(response)
}
