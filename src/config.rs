use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::sandbox::Backend;

const CONFIG_FILE: &str = "daybridge.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub daytona: DaytonaConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Provider selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Which backend provisions sandboxes: "daytona" or "docker"
    #[serde(default = "default_backend")]
    pub backend: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
        }
    }
}

impl ProviderConfig {
    /// Parse the backend string into a Backend enum
    pub fn get_backend(&self) -> Result<Backend> {
        self.backend.parse()
    }
}

fn default_backend() -> String {
    "daytona".to_string()
}

/// Daytona API configuration. The API key is never read from this file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaytonaConfig {
    /// API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Target region (optional, uses the organization default if not set)
    #[serde(default)]
    pub target: Option<String>,

    /// Organization id, for keys that span several organizations
    #[serde(default)]
    pub organization_id: Option<String>,
}

impl Default for DaytonaConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            target: None,
            organization_id: None,
        }
    }
}

fn default_api_url() -> String {
    "https://app.daytona.io/api".to_string()
}

/// Local Docker backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Image for new sandboxes
    #[serde(default = "default_image")]
    pub image: String,

    /// Working directory inside the container
    #[serde(default = "default_repo_path")]
    pub work_dir: String,

    /// Container ports published for preview URLs
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,

    /// Network configuration
    #[serde(default)]
    pub network: NetworkConfig,

    /// Resource limits
    #[serde(default)]
    pub resources: ResourceConfig,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            work_dir: default_repo_path(),
            ports: default_ports(),
            network: NetworkConfig::default(),
            resources: ResourceConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkPolicy {
    #[default]
    AllowAll,
    Deny,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network policy
    #[serde(default)]
    pub policy: NetworkPolicy,

    /// Custom DNS servers
    #[serde(default = "default_dns")]
    pub dns: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            policy: NetworkPolicy::AllowAll,
            dns: default_dns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Memory limit (e.g., "4g")
    #[serde(default = "default_memory")]
    pub memory: String,

    /// CPU limit (e.g., "2")
    #[serde(default = "default_cpus")]
    pub cpus: String,
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            cpus: default_cpus(),
        }
    }
}

/// What the host is told about the sandbox layout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Project repository path inside the sandbox
    #[serde(default = "default_repo_path")]
    pub repo_path: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            repo_path: default_repo_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Delete sandboxes attached by `serve` when it exits
    #[serde(default)]
    pub delete_on_exit: bool,

    /// Upper bound for each exit-time deletion
    #[serde(default = "default_exit_timeout")]
    pub exit_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            delete_on_exit: false,
            exit_timeout_secs: default_exit_timeout(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Session store directory (default: <data dir>/daybridge/storage)
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

// Default value functions
fn default_image() -> String {
    "daybridge:latest".to_string()
}

fn default_repo_path() -> String {
    "/home/daytona/project".to_string()
}

fn default_ports() -> Vec<u16> {
    vec![3000, 5173, 8080]
}

fn default_dns() -> Vec<String> {
    vec!["8.8.8.8".to_string(), "1.1.1.1".to_string()]
}

fn default_memory() -> String {
    "4g".to_string()
}

fn default_cpus() -> String {
    "2".to_string()
}

fn default_exit_timeout() -> u64 {
    10
}

impl Config {
    /// Load configuration from file, using defaults if not found
    pub fn load(project_dir: &Path) -> Result<Self> {
        let config_path = project_dir.join(CONFIG_FILE);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        Ok(config)
    }
}
