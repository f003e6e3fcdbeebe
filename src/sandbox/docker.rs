//! Local Docker sandboxes.
//!
//! Each sandbox is a long-running labelled container. Commands run through
//! `docker exec`, files move as single-entry tar archives, and listing and
//! search shell out to `ls`, `find` and `grep` inside the container.

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, DownloadFromContainerOptions,
    InspectContainerOptions, LogOutput, RemoveContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::Docker;
use bytes::Bytes;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{
    Capabilities, CommandOutput, FileInfo, Match, Provisioner, RemoteSandbox, SandboxError,
    SandboxResult,
};
use crate::config::{DockerConfig, NetworkPolicy};

/// Label marking containers this tool manages.
const MANAGED_LABEL: &str = "daybridge.managed";

/// Where named command sessions keep their logs inside the container.
const SESSIONS_DIR: &str = "/tmp/.daybridge/sessions";

/// Provisions sandboxes as local containers.
pub(crate) struct DockerProvisioner {
    docker: Docker,
    config: DockerConfig,
}

impl DockerProvisioner {
    pub fn new(config: DockerConfig) -> SandboxResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| SandboxError::docker(format!("Failed to connect to Docker: {e}")))?;
        Ok(Self { docker, config })
    }

    /// Inspect a managed container, starting it if it was stopped.
    async fn attach(&self, id: &str) -> SandboxResult<Arc<dyn RemoteSandbox>> {
        let inspect = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;

        let managed = inspect
            .config
            .as_ref()
            .and_then(|c| c.labels.as_ref())
            .is_some_and(|labels| labels.contains_key(MANAGED_LABEL));
        if !managed {
            return Err(SandboxError::not_found(id));
        }

        let mut running = inspect
            .state
            .as_ref()
            .and_then(|s| s.running)
            .unwrap_or(false);

        if !running {
            debug!("Starting stopped container {}", id);
            self.docker.start_container::<String>(id, None).await?;
            running = self
                .docker
                .inspect_container(id, None::<InspectContainerOptions>)
                .await?
                .state
                .and_then(|s| s.running)
                .unwrap_or(false);
        }

        Ok(Arc::new(DockerSandbox {
            id: inspect.id.unwrap_or_else(|| id.to_string()),
            docker: self.docker.clone(),
            work_dir: self.config.work_dir.clone(),
            capabilities: if running {
                Capabilities::FULL
            } else {
                Capabilities::NONE
            },
        }))
    }
}

#[async_trait]
impl Provisioner for DockerProvisioner {
    fn name(&self) -> &'static str {
        "docker"
    }

    async fn create(&self) -> SandboxResult<Arc<dyn RemoteSandbox>> {
        self.docker
            .ping()
            .await
            .map_err(|e| SandboxError::docker(format!("Cannot ping Docker daemon: {e}")))?;

        let short = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("daybridge-{}", &short[..8]);

        debug!("Creating container: {}", name);
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                build_container_config(&self.config)?,
            )
            .await?;

        if let Err(e) = self
            .docker
            .start_container::<String>(&created.id, None)
            .await
        {
            warn!("Failed to start container {}, removing it", name);
            if let Err(remove_err) = self
                .docker
                .remove_container(
                    &created.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await
            {
                warn!("Failed to remove container {}: {}", name, remove_err);
            }
            return Err(e.into());
        }
        info!("Container {} started", name);

        self.attach(&created.id).await
    }

    async fn get(&self, id: &str) -> SandboxResult<Arc<dyn RemoteSandbox>> {
        self.attach(id).await
    }

    async fn delete(&self, sandbox: &dyn RemoteSandbox) -> SandboxResult<()> {
        self.docker
            .remove_container(
                sandbox.id(),
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }
}

/// A running container.
struct DockerSandbox {
    id: String,
    docker: Docker,
    work_dir: String,
    capabilities: Capabilities,
}

impl DockerSandbox {
    /// Run an argv to completion and collect combined output.
    async fn exec(&self, cmd: Vec<String>) -> SandboxResult<CommandOutput> {
        let exec = self
            .docker
            .create_exec(
                &self.id,
                CreateExecOptions {
                    cmd: Some(cmd),
                    working_dir: Some(self.work_dir.clone()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let mut output = String::new();

        if let StartExecResults::Attached {
            output: mut stream, ..
        } = self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message } | LogOutput::StdErr { message }) => {
                        output.push_str(&String::from_utf8_lossy(&message));
                    }
                    Err(e) => {
                        warn!("Error reading exec output: {}", e);
                    }
                    _ => {}
                }
            }
        }

        let exit_code = self
            .docker
            .inspect_exec(&exec.id)
            .await?
            .exit_code
            .unwrap_or(-1);

        Ok(CommandOutput { exit_code, output })
    }

    /// Run a shell snippet.
    async fn sh(&self, script: &str) -> SandboxResult<CommandOutput> {
        self.exec(vec!["sh".to_string(), "-c".to_string(), script.to_string()])
            .await
    }

    fn absolute(&self, path: &str) -> String {
        if path.starts_with('/') {
            path.to_string()
        } else {
            format!("{}/{}", self.work_dir.trim_end_matches('/'), path)
        }
    }
}

#[async_trait]
impl RemoteSandbox for DockerSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn work_dir(&self) -> SandboxResult<String> {
        Ok(self.work_dir.clone())
    }

    async fn execute_command(&self, command: &str) -> SandboxResult<CommandOutput> {
        self.sh(command).await
    }

    async fn create_session(&self, session_id: &str) -> SandboxResult<()> {
        let dir = format!("{SESSIONS_DIR}/{session_id}");
        let out = self
            .exec(vec!["mkdir".to_string(), "-p".to_string(), dir])
            .await?;
        if out.exit_code != 0 {
            return Err(SandboxError::docker(out.output));
        }
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> SandboxResult<()> {
        let dir = format!("{SESSIONS_DIR}/{session_id}");
        let out = self
            .exec(vec!["test".to_string(), "-d".to_string(), dir])
            .await?;
        if out.exit_code != 0 {
            return Err(SandboxError::not_found(session_id));
        }
        Ok(())
    }

    async fn execute_session_command(
        &self,
        session_id: &str,
        command: &str,
        run_async: bool,
    ) -> SandboxResult<String> {
        let cmd_id = uuid::Uuid::new_v4().to_string();
        let log = format!("{SESSIONS_DIR}/{session_id}/{cmd_id}");
        let script = format!("{{ {command}\n}} > {log}.log 2>&1; echo $? > {log}.exit");

        let exec = self
            .docker
            .create_exec(
                &self.id,
                CreateExecOptions {
                    cmd: Some(vec!["sh".to_string(), "-c".to_string(), script]),
                    working_dir: Some(self.work_dir.clone()),
                    attach_stdout: Some(!run_async),
                    attach_stderr: Some(!run_async),
                    ..Default::default()
                },
            )
            .await?;

        let started = self
            .docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: run_async,
                    ..Default::default()
                }),
            )
            .await?;

        if let StartExecResults::Attached { mut output, .. } = started {
            while output.next().await.is_some() {}
        }

        Ok(cmd_id)
    }

    async fn download_file(&self, path: &str) -> SandboxResult<Vec<u8>> {
        let path = self.absolute(path);
        let mut stream = self.docker.download_from_container(
            &self.id,
            Some(DownloadFromContainerOptions { path: path.clone() }),
        );

        let mut archive = Vec::new();
        while let Some(chunk) = stream.next().await {
            archive.extend_from_slice(&chunk?);
        }

        first_entry(&archive).ok_or_else(|| SandboxError::not_found(path))
    }

    async fn upload_file(&self, content: Vec<u8>, path: &str) -> SandboxResult<()> {
        let path = self.absolute(path);
        let (dir, name) = match path.rsplit_once('/') {
            Some(("", name)) => ("/".to_string(), name.to_string()),
            Some((dir, name)) => (dir.to_string(), name.to_string()),
            None => (self.work_dir.clone(), path.clone()),
        };

        let out = self
            .exec(vec!["mkdir".to_string(), "-p".to_string(), dir.clone()])
            .await?;
        if out.exit_code != 0 {
            return Err(SandboxError::docker(out.output));
        }

        let tar = single_file_tar(&name, &content)
            .map_err(|e| SandboxError::docker(format!("Failed to build archive: {e}")))?;

        self.docker
            .upload_to_container(
                &self.id,
                Some(UploadToContainerOptions {
                    path: dir,
                    ..Default::default()
                }),
                Bytes::from(tar),
            )
            .await?;
        Ok(())
    }

    async fn list_files(&self, path: &str) -> SandboxResult<Vec<FileInfo>> {
        let out = self
            .exec(vec![
                "ls".to_string(),
                "-1Ap".to_string(),
                self.absolute(path),
            ])
            .await?;
        if out.exit_code != 0 {
            return Err(SandboxError::docker(out.output));
        }
        Ok(parse_ls(&out.output))
    }

    async fn search_files(&self, root: &str, pattern: &str) -> SandboxResult<Vec<String>> {
        let mut cmd = vec!["find".to_string(), self.absolute(root), "-type".to_string(), "f".to_string()];
        let rest = pattern.trim_start_matches("**/");
        if rest.contains('/') {
            cmd.push("-path".to_string());
            cmd.push(format!("*/{rest}"));
        } else {
            cmd.push("-name".to_string());
            cmd.push(rest.to_string());
        }

        let out = self.exec(cmd).await?;
        Ok(out
            .output
            .lines()
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    async fn find_in_files(&self, root: &str, pattern: &str) -> SandboxResult<Vec<Match>> {
        let out = self
            .exec(vec![
                "grep".to_string(),
                "-rnI".to_string(),
                "-e".to_string(),
                pattern.to_string(),
                self.absolute(root),
            ])
            .await?;
        // grep exits 1 when nothing matched
        if out.exit_code > 1 {
            return Err(SandboxError::docker(out.output));
        }
        Ok(parse_grep(&out.output))
    }

    async fn preview_url(&self, port: u16) -> SandboxResult<String> {
        let inspect = self
            .docker
            .inspect_container(&self.id, None::<InspectContainerOptions>)
            .await?;

        let host_port = inspect
            .network_settings
            .and_then(|n| n.ports)
            .and_then(|ports| ports.get(&format!("{port}/tcp")).cloned().flatten())
            .and_then(|bindings| bindings.into_iter().find_map(|b| b.host_port));

        match host_port {
            Some(host_port) => Ok(format!("http://localhost:{host_port}")),
            None => Err(SandboxError::docker(format!(
                "Port {port} is not published; add it to [docker].ports"
            ))),
        }
    }
}

/// Container settings for a new sandbox.
fn build_container_config(config: &DockerConfig) -> SandboxResult<ContainerConfig<String>> {
    let memory = parse_memory_limit(&config.resources.memory)?;
    let cpus = config.resources.cpus.parse::<f64>().unwrap_or(2.0);

    let exposed_ports: HashMap<String, HashMap<(), ()>> = config
        .ports
        .iter()
        .map(|p| (format!("{p}/tcp"), HashMap::new()))
        .collect();

    let network_mode = match config.network.policy {
        NetworkPolicy::Deny => Some("none".to_string()),
        NetworkPolicy::AllowAll => None,
    };

    Ok(ContainerConfig {
        image: Some(config.image.clone()),
        cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
        working_dir: Some(config.work_dir.clone()),
        labels: Some(HashMap::from([(
            MANAGED_LABEL.to_string(),
            "true".to_string(),
        )])),
        exposed_ports: Some(exposed_ports),
        host_config: Some(bollard::service::HostConfig {
            memory: Some(memory),
            nano_cpus: Some((cpus * 1_000_000_000.0) as i64),
            dns: Some(config.network.dns.clone()),
            publish_all_ports: Some(true),
            network_mode,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Build a tar archive holding one regular file.
fn single_file_tar(name: &str, content: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(chrono::Utc::now().timestamp().unsigned_abs());
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, name, content)?;
    builder.into_inner()
}

/// Contents of the first regular file in a tar archive.
fn first_entry(archive: &[u8]) -> Option<Vec<u8>> {
    let mut archive = tar::Archive::new(archive);
    let entries = archive.entries().ok()?;
    for entry in entries {
        let mut entry = entry.ok()?;
        if entry.header().entry_type().is_file() {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf).ok()?;
            return Some(buf);
        }
    }
    None
}

/// Parse `ls -1Ap` output; directories carry a trailing slash.
fn parse_ls(output: &str) -> Vec<FileInfo> {
    output
        .lines()
        .filter(|l| !l.is_empty())
        .map(|line| match line.strip_suffix('/') {
            Some(dir) => FileInfo {
                name: dir.to_string(),
                is_dir: true,
                size: 0,
            },
            None => FileInfo {
                name: line.to_string(),
                is_dir: false,
                size: 0,
            },
        })
        .collect()
}

/// Parse `grep -rn` output (`file:line:content`).
fn parse_grep(output: &str) -> Vec<Match> {
    output
        .lines()
        .filter_map(|line| {
            let (file, rest) = line.split_once(':')?;
            let (line_no, content) = rest.split_once(':')?;
            Some(Match {
                file: file.to_string(),
                line: line_no.parse().ok()?,
                content: content.to_string(),
            })
        })
        .collect()
}

/// Parse memory limit string (e.g., "8g", "512m") to bytes
fn parse_memory_limit(limit: &str) -> SandboxResult<i64> {
    let limit = limit.to_lowercase();
    let invalid = |_| SandboxError::docker(format!("Invalid memory limit: {limit}"));

    if let Some(num) = limit.strip_suffix('g') {
        let gigs: i64 = num.parse().map_err(invalid)?;
        Ok(gigs * 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('m') {
        let megs: i64 = num.parse().map_err(invalid)?;
        Ok(megs * 1024 * 1024)
    } else {
        limit.parse().map_err(invalid)
    }
}
