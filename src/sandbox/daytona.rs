//! Daytona cloud sandboxes.
//!
//! Talks to the Daytona REST API directly:
//! - control plane: `POST /sandbox`, `GET /sandbox/{id}`, `DELETE /sandbox/{id}`
//! - toolbox: `/toolbox/{id}/toolbox/...` for processes and files
//!
//! Requires `DAYTONA_API_KEY`.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    Capabilities, CommandOutput, FileInfo, Match, Provisioner, RemoteSandbox, SandboxError,
    SandboxResult,
};
use crate::config::DaytonaConfig;

/// How long `create` waits for a new sandbox to reach `started`.
const START_TIMEOUT: Duration = Duration::from_secs(60);
const START_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Shared HTTP plumbing for the provisioner and its sandboxes.
#[derive(Debug)]
struct ApiClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    organization_id: Option<String>,
}

impl ApiClient {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let mut req = self
            .http
            .request(method, self.url(path))
            .header("X-Daytona-Source", "daybridge");
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        if let Some(ref org) = self.organization_id {
            req = req.header("X-Daytona-Organization-ID", org);
        }
        req
    }

    async fn send(&self, req: RequestBuilder) -> SandboxResult<Response> {
        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or(body);

        if status == StatusCode::NOT_FOUND {
            return Err(SandboxError::not_found(message));
        }
        Err(SandboxError::api(status.as_u16(), message))
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> SandboxResult<T> {
        Ok(self.send(req).await?.json::<T>().await?)
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SandboxDto {
    id: String,
    #[serde(default)]
    state: Option<String>,
}

impl SandboxDto {
    fn is_started(&self) -> bool {
        self.state.as_deref() == Some("started")
    }

    fn is_starting(&self) -> bool {
        matches!(
            self.state.as_deref(),
            Some("creating" | "starting" | "pending_build" | "building_snapshot" | "restoring")
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSandboxRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    target: Option<&'a str>,
    labels: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteResponse {
    exit_code: i64,
    #[serde(default)]
    result: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionExecuteResponse {
    cmd_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileInfoDto {
    name: String,
    #[serde(default)]
    is_dir: bool,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectDirResponse {
    dir: String,
}

#[derive(Debug, Deserialize)]
struct PreviewResponse {
    url: String,
}

/// Provisions sandboxes through the Daytona API.
pub(crate) struct DaytonaProvisioner {
    api: Arc<ApiClient>,
    target: Option<String>,
}

impl DaytonaProvisioner {
    pub fn new(config: &DaytonaConfig, api_key: Option<String>) -> SandboxResult<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            api: Arc::new(ApiClient {
                http,
                base_url: config.api_url.clone(),
                api_key: api_key.filter(|k| !k.trim().is_empty()),
                organization_id: config.organization_id.clone(),
            }),
            target: config.target.clone(),
        })
    }

    fn sandbox(&self, dto: &SandboxDto) -> Arc<dyn RemoteSandbox> {
        let capabilities = if dto.is_started() {
            Capabilities::FULL
        } else {
            Capabilities::NONE
        };
        Arc::new(DaytonaSandbox {
            id: dto.id.clone(),
            capabilities,
            api: self.api.clone(),
        })
    }

    async fn fetch(&self, id: &str) -> SandboxResult<SandboxDto> {
        self.api
            .send_json(self.api.request(reqwest::Method::GET, &format!("/sandbox/{id}")))
            .await
    }

    async fn wait_until_started(&self, mut dto: SandboxDto) -> SandboxResult<SandboxDto> {
        let deadline = tokio::time::Instant::now() + START_TIMEOUT;
        while dto.is_starting() && tokio::time::Instant::now() < deadline {
            debug!(
                "Sandbox {} is {}, waiting",
                dto.id,
                dto.state.as_deref().unwrap_or("unknown")
            );
            tokio::time::sleep(START_POLL_INTERVAL).await;
            dto = self.fetch(&dto.id).await?;
        }
        Ok(dto)
    }
}

#[async_trait]
impl Provisioner for DaytonaProvisioner {
    fn name(&self) -> &'static str {
        "daytona"
    }

    fn ensure_configured(&self) -> SandboxResult<()> {
        if self.api.api_key.is_some() {
            Ok(())
        } else {
            Err(SandboxError::MissingCredentials)
        }
    }

    async fn create(&self) -> SandboxResult<Arc<dyn RemoteSandbox>> {
        let body = CreateSandboxRequest {
            target: self.target.as_deref(),
            labels: json!({ "created-by": "daybridge" }),
        };
        let dto: SandboxDto = self
            .api
            .send_json(self.api.request(reqwest::Method::POST, "/sandbox").json(&body))
            .await?;
        info!("Daytona sandbox {} requested", dto.id);

        let dto = self.wait_until_started(dto).await?;
        Ok(self.sandbox(&dto))
    }

    async fn get(&self, id: &str) -> SandboxResult<Arc<dyn RemoteSandbox>> {
        let dto = self.fetch(id).await?;
        Ok(self.sandbox(&dto))
    }

    async fn delete(&self, sandbox: &dyn RemoteSandbox) -> SandboxResult<()> {
        self.api
            .send(
                self.api
                    .request(reqwest::Method::DELETE, &format!("/sandbox/{}", sandbox.id())),
            )
            .await?;
        Ok(())
    }
}

/// A started Daytona sandbox.
struct DaytonaSandbox {
    id: String,
    capabilities: Capabilities,
    api: Arc<ApiClient>,
}

impl DaytonaSandbox {
    fn toolbox(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        self.api
            .request(method, &format!("/toolbox/{}/toolbox{}", self.id, path))
    }
}

#[async_trait]
impl RemoteSandbox for DaytonaSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn work_dir(&self) -> SandboxResult<String> {
        let res: ProjectDirResponse = self
            .api
            .send_json(self.toolbox(reqwest::Method::GET, "/project-dir"))
            .await?;
        Ok(res.dir)
    }

    async fn execute_command(&self, command: &str) -> SandboxResult<CommandOutput> {
        let res: ExecuteResponse = self
            .api
            .send_json(
                self.toolbox(reqwest::Method::POST, "/process/execute")
                    .json(&json!({ "command": command })),
            )
            .await?;
        Ok(CommandOutput {
            exit_code: res.exit_code,
            output: res.result,
        })
    }

    async fn create_session(&self, session_id: &str) -> SandboxResult<()> {
        self.api
            .send(
                self.toolbox(reqwest::Method::POST, "/process/session")
                    .json(&json!({ "sessionId": session_id })),
            )
            .await?;
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> SandboxResult<()> {
        self.api
            .send(self.toolbox(
                reqwest::Method::GET,
                &format!("/process/session/{session_id}"),
            ))
            .await?;
        Ok(())
    }

    async fn execute_session_command(
        &self,
        session_id: &str,
        command: &str,
        run_async: bool,
    ) -> SandboxResult<String> {
        let res: SessionExecuteResponse = self
            .api
            .send_json(
                self.toolbox(
                    reqwest::Method::POST,
                    &format!("/process/session/{session_id}/exec"),
                )
                .json(&json!({ "command": command, "runAsync": run_async })),
            )
            .await?;
        res.cmd_id
            .ok_or_else(|| SandboxError::api(200, "session exec response had no cmdId"))
    }

    async fn download_file(&self, path: &str) -> SandboxResult<Vec<u8>> {
        let response = self
            .api
            .send(
                self.toolbox(reqwest::Method::GET, "/files/download")
                    .query(&[("path", path)]),
            )
            .await?;
        Ok(response.bytes().await?.to_vec())
    }

    async fn upload_file(&self, content: Vec<u8>, path: &str) -> SandboxResult<()> {
        let file_name = path.rsplit('/').next().unwrap_or(path).to_string();
        let part = reqwest::multipart::Part::bytes(content).file_name(file_name);
        let form = reqwest::multipart::Form::new().part("file", part);
        self.api
            .send(
                self.toolbox(reqwest::Method::POST, "/files/upload")
                    .query(&[("path", path)])
                    .multipart(form),
            )
            .await?;
        Ok(())
    }

    async fn list_files(&self, path: &str) -> SandboxResult<Vec<FileInfo>> {
        let entries: Vec<FileInfoDto> = self
            .api
            .send_json(self.toolbox(reqwest::Method::GET, "/files").query(&[("path", path)]))
            .await?;
        Ok(entries
            .into_iter()
            .map(|e| FileInfo {
                name: e.name,
                is_dir: e.is_dir,
                size: e.size,
            })
            .collect())
    }

    async fn search_files(&self, root: &str, pattern: &str) -> SandboxResult<Vec<String>> {
        let res: SearchResponse = self
            .api
            .send_json(
                self.toolbox(reqwest::Method::GET, "/files/search")
                    .query(&[("path", root), ("pattern", pattern)]),
            )
            .await?;
        Ok(res.files)
    }

    async fn find_in_files(&self, root: &str, pattern: &str) -> SandboxResult<Vec<Match>> {
        self.api
            .send_json(
                self.toolbox(reqwest::Method::GET, "/files/find")
                    .query(&[("path", root), ("pattern", pattern)]),
            )
            .await
    }

    async fn preview_url(&self, port: u16) -> SandboxResult<String> {
        let res: PreviewResponse = self
            .api
            .send_json(self.api.request(
                reqwest::Method::GET,
                &format!("/sandbox/{}/ports/{port}/preview-url", self.id),
            ))
            .await?;
        Ok(res.url)
    }
}
