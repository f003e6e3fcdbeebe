//! In-memory provisioner for testing.
//!
//! Tracks provider calls so tests can assert on round-trips, and keeps
//! sandbox files in memory so edit operations can be verified end to end.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{
    Capabilities, CommandOutput, FileInfo, Match, Provisioner, RemoteSandbox, SandboxError,
    SandboxResult,
};

/// Call counters shared by a provisioner and all the sandboxes it hands out.
#[derive(Debug, Default)]
pub(crate) struct CallCounts {
    pub create: AtomicUsize,
    pub get: AtomicUsize,
    pub delete: AtomicUsize,
    pub create_session: AtomicUsize,
    pub download: AtomicUsize,
    pub upload: AtomicUsize,
}

impl CallCounts {
    pub fn load(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// A mock provisioner backed by an in-memory sandbox table.
#[derive(Clone)]
pub(crate) struct MockProvisioner {
    sandboxes: Arc<Mutex<HashMap<String, Arc<MockSandbox>>>>,
    next_id: Arc<AtomicUsize>,
    pub calls: Arc<CallCounts>,
    configured: bool,
    capabilities: Capabilities,
    fail_deletes: Arc<AtomicBool>,
}

impl MockProvisioner {
    /// Create a configured provisioner whose sandboxes are fully capable.
    pub fn new() -> Self {
        Self {
            sandboxes: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicUsize::new(1)),
            calls: Arc::new(CallCounts::default()),
            configured: true,
            capabilities: Capabilities::FULL,
            fail_deletes: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Create a provisioner that reports missing credentials.
    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new()
        }
    }

    /// Create a provisioner whose sandboxes report the given capabilities.
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities,
            ..Self::new()
        }
    }

    /// Register a sandbox that exists upstream (as if created by an earlier process).
    pub fn seed(&self, id: &str) -> Arc<MockSandbox> {
        let sandbox = Arc::new(MockSandbox::new(id, self.capabilities, self.calls.clone()));
        self.sandboxes
            .lock()
            .unwrap()
            .insert(id.to_string(), sandbox.clone());
        sandbox
    }

    /// Look up a sandbox by id.
    pub fn sandbox(&self, id: &str) -> Option<Arc<MockSandbox>> {
        self.sandboxes.lock().unwrap().get(id).cloned()
    }

    /// Make every `delete` fail with an API error, leaving the sandbox alive.
    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Whether a sandbox with this id is still alive upstream.
    pub fn exists(&self, id: &str) -> bool {
        self.sandboxes.lock().unwrap().contains_key(id)
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn ensure_configured(&self) -> SandboxResult<()> {
        if self.configured {
            Ok(())
        } else {
            Err(SandboxError::MissingCredentials)
        }
    }

    async fn create(&self) -> SandboxResult<Arc<dyn RemoteSandbox>> {
        self.calls.create.fetch_add(1, Ordering::SeqCst);
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let sandbox: Arc<dyn RemoteSandbox> = self.seed(&format!("mock-{n}"));
        Ok(sandbox)
    }

    async fn get(&self, id: &str) -> SandboxResult<Arc<dyn RemoteSandbox>> {
        self.calls.get.fetch_add(1, Ordering::SeqCst);
        match self.sandbox(id) {
            Some(sandbox) => Ok(sandbox as Arc<dyn RemoteSandbox>),
            None => Err(SandboxError::not_found(id)),
        }
    }

    async fn delete(&self, sandbox: &dyn RemoteSandbox) -> SandboxResult<()> {
        self.calls.delete.fetch_add(1, Ordering::SeqCst);
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(SandboxError::api(500, "delete failed"));
        }
        match self.sandboxes.lock().unwrap().remove(sandbox.id()) {
            Some(_) => Ok(()),
            None => Err(SandboxError::not_found(sandbox.id())),
        }
    }
}

/// In-memory sandbox.
pub(crate) struct MockSandbox {
    id: String,
    capabilities: Capabilities,
    calls: Arc<CallCounts>,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    sessions: Mutex<HashSet<String>>,
    commands: Mutex<Vec<(String, String)>>,
    fail_uploads: Mutex<bool>,
}

impl MockSandbox {
    fn new(id: &str, capabilities: Capabilities, calls: Arc<CallCounts>) -> Self {
        Self {
            id: id.to_string(),
            capabilities,
            calls,
            files: Mutex::new(BTreeMap::new()),
            sessions: Mutex::new(HashSet::new()),
            commands: Mutex::new(Vec::new()),
            fail_uploads: Mutex::new(false),
        }
    }

    pub fn put_file(&self, path: &str, content: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), content.as_bytes().to_vec());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .map(|b| String::from_utf8_lossy(b).to_string())
    }

    pub fn set_fail_uploads(&self, fail: bool) {
        *self.fail_uploads.lock().unwrap() = fail;
    }

    /// Commands submitted to named sessions, as `(session, command)`.
    pub fn session_commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteSandbox for MockSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn work_dir(&self) -> SandboxResult<String> {
        Ok("/home/daytona".to_string())
    }

    async fn execute_command(&self, command: &str) -> SandboxResult<CommandOutput> {
        if let Some(rest) = command.strip_prefix("exit ") {
            let exit_code = rest.trim().parse().unwrap_or(1);
            return Ok(CommandOutput {
                exit_code,
                output: String::new(),
            });
        }
        let output = command.strip_prefix("echo ").unwrap_or(command);
        Ok(CommandOutput {
            exit_code: 0,
            output: format!("{output}\n"),
        })
    }

    async fn create_session(&self, session_id: &str) -> SandboxResult<()> {
        self.calls.create_session.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().unwrap().insert(session_id.to_string());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> SandboxResult<()> {
        if self.sessions.lock().unwrap().contains(session_id) {
            Ok(())
        } else {
            Err(SandboxError::api(404, format!("session {session_id} not found")))
        }
    }

    async fn execute_session_command(
        &self,
        session_id: &str,
        command: &str,
        _run_async: bool,
    ) -> SandboxResult<String> {
        if !self.sessions.lock().unwrap().contains(session_id) {
            return Err(SandboxError::api(404, format!("session {session_id} not found")));
        }
        let mut commands = self.commands.lock().unwrap();
        commands.push((session_id.to_string(), command.to_string()));
        Ok(format!("cmd-{}", commands.len()))
    }

    async fn download_file(&self, path: &str) -> SandboxResult<Vec<u8>> {
        self.calls.download.fetch_add(1, Ordering::SeqCst);
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| SandboxError::api(404, format!("file not found: {path}")))
    }

    async fn upload_file(&self, content: Vec<u8>, path: &str) -> SandboxResult<()> {
        self.calls.upload.fetch_add(1, Ordering::SeqCst);
        if *self.fail_uploads.lock().unwrap() {
            return Err(SandboxError::api(500, "upload failed"));
        }
        self.files.lock().unwrap().insert(path.to_string(), content);
        Ok(())
    }

    async fn list_files(&self, path: &str) -> SandboxResult<Vec<FileInfo>> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let files = self.files.lock().unwrap();
        let mut names: Vec<String> = files
            .keys()
            .filter_map(|p| p.strip_prefix(&prefix))
            .map(|rest| rest.split('/').next().unwrap_or(rest).to_string())
            .collect();
        names.dedup();
        Ok(names
            .into_iter()
            .map(|name| FileInfo {
                name,
                is_dir: false,
                size: 0,
            })
            .collect())
    }

    async fn search_files(&self, root: &str, pattern: &str) -> SandboxResult<Vec<String>> {
        let suffix = pattern.trim_start_matches("**/").trim_start_matches('*');
        Ok(self
            .files
            .lock()
            .unwrap()
            .keys()
            .filter(|p| p.starts_with(root) && p.ends_with(suffix))
            .cloned()
            .collect())
    }

    async fn find_in_files(&self, root: &str, pattern: &str) -> SandboxResult<Vec<Match>> {
        let files = self.files.lock().unwrap();
        let mut matches = Vec::new();
        for (path, content) in files.iter().filter(|(p, _)| p.starts_with(root)) {
            let text = String::from_utf8_lossy(content);
            for (idx, line) in text.lines().enumerate() {
                if line.contains(pattern) {
                    matches.push(Match {
                        file: path.clone(),
                        line: idx as u64 + 1,
                        content: line.to_string(),
                    });
                }
            }
        }
        Ok(matches)
    }

    async fn preview_url(&self, port: u16) -> SandboxResult<String> {
        Ok(format!("https://{port}-{}.proxy.example", self.id))
    }
}
