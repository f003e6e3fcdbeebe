//! CLI command implementations.
//!
//! Each submodule implements one daybridge command. Shared setup (config,
//! store location, provisioner choice) lives here so every command sees
//! the same project the same way.

pub mod delete;
pub mod prompt;
pub mod serve;
pub mod sessions;
pub mod tool;

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::config::Config;
use crate::registry::SessionRegistry;
use crate::sandbox::{Backend, DaytonaProvisioner, DockerProvisioner, Provisioner};
use crate::store::SessionStore;
use crate::tools::{ProjectContext, Toolbox};

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub(crate) struct GlobalArgs {
    pub project_id: String,
    pub worktree: Option<PathBuf>,
    pub storage_dir: Option<PathBuf>,
    pub api_key: Option<String>,
}

/// Everything a command needs to talk about one project.
pub(crate) struct Workspace {
    pub config: Config,
    pub project: ProjectContext,
    pub store_dir: PathBuf,
}

impl Workspace {
    /// Resolve worktree, config and store location.
    pub fn open(args: &GlobalArgs) -> Result<Self> {
        let worktree = match &args.worktree {
            Some(path) => path.clone(),
            None => std::env::current_dir().context("Failed to get current directory")?,
        };

        let config = Config::load(&worktree)?;

        let store_dir = match (&args.storage_dir, &config.storage.dir) {
            (Some(dir), _) | (None, Some(dir)) => dir.clone(),
            (None, None) => SessionStore::default_dir()?,
        };
        debug!("Session store: {}", store_dir.display());

        Ok(Self {
            config,
            project: ProjectContext {
                project_id: args.project_id.clone(),
                worktree: worktree.display().to_string(),
            },
            store_dir,
        })
    }

    pub fn store(&self) -> SessionStore {
        SessionStore::new(&self.store_dir)
    }

    /// Build the provisioner selected by `[provider].backend`.
    pub fn provisioner(&self, api_key: Option<String>) -> Result<Arc<dyn Provisioner>> {
        let provisioner: Arc<dyn Provisioner> = match self.config.provider.get_backend()? {
            Backend::Daytona => Arc::new(DaytonaProvisioner::new(&self.config.daytona, api_key)?),
            Backend::Docker => Arc::new(DockerProvisioner::new(self.config.docker.clone())?),
        };
        debug!("Using {} backend", provisioner.name());
        Ok(provisioner)
    }

    pub fn registry(&self, api_key: Option<String>) -> Result<Arc<SessionRegistry>> {
        Ok(Arc::new(SessionRegistry::new(
            self.provisioner(api_key)?,
            self.store(),
        )))
    }

    pub fn toolbox(&self, registry: Arc<SessionRegistry>) -> Toolbox {
        Toolbox::new(registry, self.project.clone())
    }
}
