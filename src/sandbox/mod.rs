//! Remote sandbox providers.
//!
//! A [`Provisioner`] creates, attaches to and deletes sandboxes; each live
//! sandbox is a [`RemoteSandbox`] exposing process and filesystem
//! capabilities. Two backends exist:
//! - `daytona`: Daytona cloud sandboxes over the REST API (needs an API key)
//! - `docker`: local long-running containers (no credentials)
//!
//! The backend is selected via `[provider].backend` in daybridge.toml.

mod daytona;
mod docker;
mod error;
#[cfg(test)]
pub(crate) mod mock;

pub(crate) use daytona::DaytonaProvisioner;
pub(crate) use docker::DockerProvisioner;
pub(crate) use error::SandboxError;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Result alias for provider calls.
pub(crate) type SandboxResult<T> = Result<T, SandboxError>;

/// Creates, attaches to and deletes remote sandboxes.
#[async_trait]
pub(crate) trait Provisioner: Send + Sync {
    /// Returns the backend name for display.
    fn name(&self) -> &'static str;

    /// Fails with [`SandboxError::MissingCredentials`] when the backend cannot
    /// be used at all.
    fn ensure_configured(&self) -> SandboxResult<()> {
        Ok(())
    }

    /// Provisions a new sandbox.
    async fn create(&self) -> SandboxResult<Arc<dyn RemoteSandbox>>;

    /// Attaches to an existing sandbox by id.
    async fn get(&self, id: &str) -> SandboxResult<Arc<dyn RemoteSandbox>>;

    /// Deletes a sandbox.
    async fn delete(&self, sandbox: &dyn RemoteSandbox) -> SandboxResult<()>;
}

/// Capabilities a sandbox handle exposes once fully started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Capabilities {
    /// Command execution is available.
    pub process: bool,
    /// File transfer and search are available.
    pub fs: bool,
}

impl Capabilities {
    /// Both process and filesystem capabilities.
    pub const FULL: Self = Self {
        process: true,
        fs: true,
    };

    /// No capabilities (sandbox stopped, archived, still starting...).
    pub const NONE: Self = Self {
        process: false,
        fs: false,
    };

    /// Name of the first missing capability, if any.
    pub fn missing(self) -> Option<&'static str> {
        if !self.process {
            Some("process")
        } else if !self.fs {
            Some("fs")
        } else {
            None
        }
    }
}

/// Output of a synchronous command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommandOutput {
    pub exit_code: i64,
    /// Combined stdout and stderr.
    pub output: String,
}

/// Directory entry returned by `list_files`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct FileInfo {
    pub name: String,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub size: u64,
}

/// A single text search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Match {
    pub file: String,
    pub line: u64,
    pub content: String,
}

/// A live, attached sandbox.
#[async_trait]
pub(crate) trait RemoteSandbox: Send + Sync {
    /// Provider-assigned identifier.
    fn id(&self) -> &str;

    /// Capabilities reported when the handle was obtained.
    fn capabilities(&self) -> Capabilities;

    /// Default working directory inside the sandbox.
    async fn work_dir(&self) -> SandboxResult<String>;

    /// Runs a command to completion.
    async fn execute_command(&self, command: &str) -> SandboxResult<CommandOutput>;

    /// Creates a named command session.
    async fn create_session(&self, session_id: &str) -> SandboxResult<()>;

    /// Fails if the named command session does not exist.
    async fn get_session(&self, session_id: &str) -> SandboxResult<()>;

    /// Submits a command to a named session and returns its command id.
    async fn execute_session_command(
        &self,
        session_id: &str,
        command: &str,
        run_async: bool,
    ) -> SandboxResult<String>;

    /// Downloads a whole file.
    async fn download_file(&self, path: &str) -> SandboxResult<Vec<u8>>;

    /// Uploads a whole file, replacing any existing content.
    async fn upload_file(&self, content: Vec<u8>, path: &str) -> SandboxResult<()>;

    /// Lists the immediate entries of a directory.
    async fn list_files(&self, path: &str) -> SandboxResult<Vec<FileInfo>>;

    /// Returns paths under `root` matching a glob pattern.
    async fn search_files(&self, root: &str, pattern: &str) -> SandboxResult<Vec<String>>;

    /// Returns lines under `root` containing `pattern`.
    async fn find_in_files(&self, root: &str, pattern: &str) -> SandboxResult<Vec<Match>>;

    /// Returns a URL reaching `port` inside the sandbox.
    async fn preview_url(&self, port: u16) -> SandboxResult<String>;
}

/// Cached local representation of a sandbox.
///
/// A `Stub` is what survives a process restart: only the id. A `Full` handle
/// can only come from `Provisioner::create` or `Provisioner::get`.
#[derive(Clone)]
pub(crate) enum SandboxHandle {
    Stub { id: String },
    Full(Arc<dyn RemoteSandbox>),
}

impl SandboxHandle {
    /// Identifier of the underlying sandbox.
    pub fn id(&self) -> &str {
        match self {
            Self::Stub { id } => id,
            Self::Full(sandbox) => sandbox.id(),
        }
    }
}

impl std::fmt::Debug for SandboxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stub { id } => f.debug_struct("Stub").field("id", id).finish(),
            Self::Full(sandbox) => f.debug_struct("Full").field("id", &sandbox.id()).finish(),
        }
    }
}

/// Supported provisioning backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum Backend {
    /// Daytona cloud sandboxes.
    #[default]
    Daytona,
    /// Local Docker containers.
    Docker,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daytona => write!(f, "daytona"),
            Self::Docker => write!(f, "docker"),
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daytona" => Ok(Self::Daytona),
            "docker" => Ok(Self::Docker),
            _ => anyhow::bail!("Unknown sandbox backend: '{s}'. Supported: daytona, docker"),
        }
    }
}
