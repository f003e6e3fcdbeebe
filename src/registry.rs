//! Session → sandbox lifecycle.
//!
//! The registry resolves a conversation session to a usable sandbox,
//! choosing between reuse, reconnect and create, and keeps the persisted
//! store in line with what it hands out. It is built once at startup and
//! shared by every tool handler.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::sandbox::{Provisioner, RemoteSandbox, SandboxError, SandboxHandle, SandboxResult};
use crate::store::SessionStore;

/// Maps session ids to sandboxes for the lifetime of the process.
pub(crate) struct SessionRegistry {
    provisioner: Arc<dyn Provisioner>,
    store: SessionStore,
    handles: Mutex<HashMap<String, SandboxHandle>>,
    hydrated: Mutex<HashSet<String>>,
}

impl SessionRegistry {
    pub fn new(provisioner: Arc<dyn Provisioner>, store: SessionStore) -> Self {
        Self {
            provisioner,
            store,
            handles: Mutex::new(HashMap::new()),
            hydrated: Mutex::new(HashSet::new()),
        }
    }

    /// Persisted store backing this registry.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Returns a fully attached sandbox for the session.
    ///
    /// Order: cached full handle, reconnect from a stub, create. A stub whose
    /// attach fails is reported, never replaced by a fresh sandbox.
    pub async fn resolve(
        &self,
        session_id: &str,
        project_id: &str,
        worktree: &str,
    ) -> SandboxResult<Arc<dyn RemoteSandbox>> {
        if let Err(e) = self.provisioner.ensure_configured() {
            error!("{}", e);
            return Err(e);
        }

        self.hydrate(project_id);

        let cached = self.handles().get(session_id).cloned();

        let sandbox = match cached {
            Some(SandboxHandle::Full(sandbox)) => {
                debug!("Reusing existing sandbox for session: {}", session_id);
                sandbox
            }
            Some(SandboxHandle::Stub { id }) => {
                info!("Reconnecting to existing sandbox: {}", id);
                let sandbox = self.provisioner.get(&id).await.map_err(|e| {
                    warn!("Failed to reconnect to sandbox {}: {}", id, e);
                    e
                })?;
                self.attach(session_id, sandbox)?
            }
            None => {
                info!(
                    "Creating new sandbox for session: {} in project: {}",
                    session_id, project_id
                );
                let sandbox = self.provisioner.create().await?;
                info!("Sandbox created successfully: {}", sandbox.id());
                match self.attach(session_id, sandbox.clone()) {
                    Ok(sandbox) => sandbox,
                    Err(e) => {
                        // Never recorded, so teardown cannot reach it later
                        if let Err(delete_err) = self.provisioner.delete(sandbox.as_ref()).await {
                            warn!(
                                "Failed to delete unusable sandbox {}: {}",
                                sandbox.id(),
                                delete_err
                            );
                        }
                        return Err(e);
                    }
                }
            }
        };

        self.record(project_id, worktree, session_id, sandbox.id());
        Ok(sandbox)
    }

    /// Deletes the session's sandbox, then forgets it.
    ///
    /// Unknown sessions are a logged no-op.
    pub async fn teardown(&self, session_id: &str, project_id: &str) -> SandboxResult<()> {
        self.hydrate(project_id);

        let cached = self.handles().get(session_id).cloned();
        if cached.is_some() {
            self.provisioner.ensure_configured()?;
        }

        let sandbox = match cached {
            Some(SandboxHandle::Full(sandbox)) => sandbox,
            Some(SandboxHandle::Stub { id }) => match self.provisioner.get(&id).await {
                Ok(sandbox) => sandbox,
                Err(e) if e.is_not_found() => {
                    warn!("Sandbox {} for session {} is already gone", id, session_id);
                    self.forget(session_id, project_id);
                    return Ok(());
                }
                Err(e) => return Err(e),
            },
            None => {
                warn!("No sandbox found for session: {}", session_id);
                return Ok(());
            }
        };

        info!("Removing sandbox {} for session: {}", sandbox.id(), session_id);
        self.provisioner.delete(sandbox.as_ref()).await?;
        self.forget(session_id, project_id);
        info!("Sandbox deleted successfully.");
        Ok(())
    }

    /// Deletes every sandbox attached in this process, bounding each
    /// deletion by `timeout`. Local state is cleared whatever the outcome.
    ///
    /// Persisted records are left in place; the next process sees them as
    /// stubs and a failed reconnect surfaces the loss.
    pub async fn shutdown(&self, timeout: Duration) {
        let attached: Vec<(String, Arc<dyn RemoteSandbox>)> = self
            .handles()
            .drain()
            .filter_map(|(session, handle)| match handle {
                SandboxHandle::Full(sandbox) => Some((session, sandbox)),
                SandboxHandle::Stub { .. } => None,
            })
            .collect();

        for (session_id, sandbox) in attached {
            info!("Deleting sandbox {} for session {} on exit", sandbox.id(), session_id);
            match tokio::time::timeout(timeout, self.provisioner.delete(sandbox.as_ref())).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to delete sandbox {}: {}", sandbox.id(), e),
                Err(_) => warn!(
                    "Timed out after {:?} deleting sandbox {}",
                    timeout,
                    sandbox.id()
                ),
            }
        }
    }

    /// Current cached handle for a session, if any.
    #[cfg(test)]
    pub fn cached(&self, session_id: &str) -> Option<SandboxHandle> {
        self.handles().get(session_id).cloned()
    }

    /// Load a project's persisted sessions as stubs, once per process.
    fn hydrate(&self, project_id: &str) {
        if !self.hydrated_projects().insert(project_id.to_string()) {
            return;
        }

        let Some(data) = self.store.load(project_id) else {
            return;
        };

        let count = data.sessions.len();
        let mut handles = self.handles();
        for (session_id, record) in data.sessions {
            handles.entry(session_id).or_insert(SandboxHandle::Stub {
                id: record.sandbox_id,
            });
        }
        info!("Loaded {} sessions for project {}", count, project_id);
    }

    /// Check capabilities and cache a freshly obtained handle as full.
    fn attach(
        &self,
        session_id: &str,
        sandbox: Arc<dyn RemoteSandbox>,
    ) -> SandboxResult<Arc<dyn RemoteSandbox>> {
        if let Some(missing) = sandbox.capabilities().missing() {
            return Err(SandboxError::not_initialized(sandbox.id(), missing));
        }

        self.handles()
            .insert(session_id.to_string(), SandboxHandle::Full(sandbox.clone()));
        Ok(sandbox)
    }

    fn record(&self, project_id: &str, worktree: &str, session_id: &str, sandbox_id: &str) {
        if let Err(e) = self.store.upsert(project_id, worktree, session_id, sandbox_id) {
            error!("Failed to persist session {}: {:#}", session_id, e);
        }
    }

    fn forget(&self, session_id: &str, project_id: &str) {
        self.handles().remove(session_id);
        if let Err(e) = self.store.remove(project_id, session_id) {
            error!("Failed to remove session {} from store: {:#}", session_id, e);
        }
    }

    fn handles(&self) -> MutexGuard<'_, HashMap<String, SandboxHandle>> {
        self.handles
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn hydrated_projects(&self) -> MutexGuard<'_, HashSet<String>> {
        self.hydrated
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
