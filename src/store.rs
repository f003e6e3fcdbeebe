//! Per-project persistence of session → sandbox mappings.
//!
//! Each project is one JSON file under the storage root, rewritten whole on
//! every mutation:
//!
//! ```text
//! <storage_dir>/
//! ├── global.json
//! └── <projectId>.json
//! ```
//!
//! There is no file locking. Two processes writing the same project file
//! race and the last writer wins.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Persisted mapping for a single session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub sandbox_id: String,
    #[serde(rename = "created", with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "lastAccessed", with = "chrono::serde::ts_milliseconds")]
    pub last_accessed_at: DateTime<Utc>,
}

/// Everything persisted for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSessionData {
    pub project_id: String,
    pub worktree: String,
    #[serde(default)]
    pub sessions: BTreeMap<String, SessionRecord>,
}

impl ProjectSessionData {
    /// Empty data for a project.
    pub fn new(project_id: &str, worktree: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            worktree: worktree.to_string(),
            sessions: BTreeMap::new(),
        }
    }

    /// Create or refresh a session record. Returns true if it was created.
    pub fn touch(&mut self, session_id: &str, sandbox_id: &str, now: DateTime<Utc>) -> bool {
        match self.sessions.get_mut(session_id) {
            Some(record) => {
                record.sandbox_id = sandbox_id.to_string();
                record.last_accessed_at = now;
                false
            }
            None => {
                self.sessions.insert(
                    session_id.to_string(),
                    SessionRecord {
                        sandbox_id: sandbox_id.to_string(),
                        created_at: now,
                        last_accessed_at: now,
                    },
                );
                true
            }
        }
    }
}

/// File-backed store rooted at a storage directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Create a store rooted at `dir`. The directory is created lazily on save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Default location: `<data dir>/daybridge/storage`.
    pub fn default_dir() -> Result<PathBuf> {
        let data = dirs::data_dir().context("Could not determine data directory")?;
        Ok(data.join("daybridge").join("storage"))
    }

    /// Storage root.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of a project's file.
    pub fn project_path(&self, project_id: &str) -> Result<PathBuf> {
        validate_project_id(project_id)?;
        Ok(self.dir.join(format!("{project_id}.json")))
    }

    /// Load a project's data.
    ///
    /// A missing file is `None`. So is an unreadable or corrupt one: the
    /// failure is logged and the project behaves as if it had no sessions.
    pub fn load(&self, project_id: &str) -> Option<ProjectSessionData> {
        match self.try_load(project_id) {
            Ok(data) => data,
            Err(e) => {
                error!("Failed to load project data for {}: {:#}", project_id, e);
                None
            }
        }
    }

    fn try_load(&self, project_id: &str) -> Result<Option<ProjectSessionData>> {
        let path = self.project_path(project_id)?;

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read session file: {}", path.display()))?;

        let data: ProjectSessionData = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse session file: {}", path.display()))?;

        Ok(Some(data))
    }

    /// Write a project's data as a whole.
    pub fn save(&self, data: &ProjectSessionData) -> Result<()> {
        let path = self.project_path(&data.project_id)?;

        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create directory: {}", self.dir.display()))?;

        let content =
            serde_json::to_string_pretty(data).context("Failed to serialize session data")?;

        fs::write(&path, content)
            .with_context(|| format!("Failed to write session file: {}", path.display()))?;

        debug!("Saved project data for {}", data.project_id);
        Ok(())
    }

    /// Create or refresh the record for a session, then save.
    pub fn upsert(
        &self,
        project_id: &str,
        worktree: &str,
        session_id: &str,
        sandbox_id: &str,
    ) -> Result<()> {
        let mut data = self
            .load(project_id)
            .unwrap_or_else(|| ProjectSessionData::new(project_id, worktree));
        data.worktree = worktree.to_string();

        if data.touch(session_id, sandbox_id, Utc::now()) {
            info!(
                "Recorded sandbox {} for session {} in project {}",
                sandbox_id, session_id, project_id
            );
        }

        self.save(&data)
    }

    /// Remove a session's record and save. Returns true if a record existed.
    pub fn remove(&self, project_id: &str, session_id: &str) -> Result<bool> {
        let Some(mut data) = self.load(project_id) else {
            return Ok(false);
        };

        if data.sessions.remove(session_id).is_none() {
            return Ok(false);
        }

        self.save(&data)?;
        Ok(true)
    }

    /// All records for a project, ordered by session id.
    pub fn list(&self, project_id: &str) -> Vec<(String, SessionRecord)> {
        self.load(project_id)
            .map(|data| data.sessions.into_iter().collect())
            .unwrap_or_default()
    }
}

/// Project ids become file names, so they must be a single plain component.
fn validate_project_id(project_id: &str) -> Result<()> {
    if project_id.is_empty()
        || project_id == "."
        || project_id == ".."
        || project_id.contains(['/', '\\', '\0'])
    {
        bail!("Invalid project id: '{project_id}'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_upsert_creates_record() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        store.upsert("proj", "/work", "s1", "sb-1").unwrap();

        let data = store.load("proj").unwrap();
        assert_eq!(data.project_id, "proj");
        assert_eq!(data.worktree, "/work");
        let record = &data.sessions["s1"];
        assert_eq!(record.sandbox_id, "sb-1");
        assert_eq!(record.created_at, record.last_accessed_at);
    }

    #[test]
    fn test_upsert_updates_existing_record() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        store.upsert("proj", "/work", "s1", "sb-1").unwrap();
        let created = store.load("proj").unwrap().sessions["s1"].created_at;

        std::thread::sleep(std::time::Duration::from_millis(5));
        store.upsert("proj", "/work", "s1", "sb-2").unwrap();

        let record = store.load("proj").unwrap().sessions["s1"].clone();
        assert_eq!(record.sandbox_id, "sb-2");
        assert_eq!(record.created_at, created);
        assert!(record.last_accessed_at > created);
    }

    #[test]
    fn test_upsert_refreshes_worktree() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        store.upsert("proj", "/old/checkout", "s1", "sb-1").unwrap();
        store.upsert("proj", "/new/checkout", "s2", "sb-2").unwrap();

        let data = store.load("proj").unwrap();
        assert_eq!(data.worktree, "/new/checkout");
        assert_eq!(data.sessions.len(), 2);
    }

    #[test]
    fn test_upsert_keeps_other_sessions() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        store.upsert("proj", "/work", "s1", "sb-1").unwrap();
        store.upsert("proj", "/work", "s2", "sb-2").unwrap();

        let data = store.load("proj").unwrap();
        assert_eq!(data.sessions.len(), 2);
        assert_eq!(data.sessions["s1"].sandbox_id, "sb-1");
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());

        store.upsert("proj", "/work", "s1", "sb-1").unwrap();
        assert!(store.remove("proj", "s1").unwrap());
        assert!(store.load("proj").unwrap().sessions.is_empty());

        // Absent records are not an error
        assert!(!store.remove("proj", "s1").unwrap());
        assert!(!store.remove("other", "s1").unwrap());
    }

    #[test]
    fn test_load_nonexistent() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.load("proj").is_none());
        assert!(store.list("proj").is_empty());
    }

    #[test]
    fn test_load_corrupt_file_is_absent() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        fs::write(dir.path().join("proj.json"), "{ not json").unwrap();

        assert!(store.load("proj").is_none());

        // The next upsert replaces the corrupt file with a valid snapshot
        store.upsert("proj", "/work", "s1", "sb-1").unwrap();
        assert_eq!(store.load("proj").unwrap().sessions.len(), 1);
    }

    #[test]
    fn test_on_disk_layout() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        fs::write(
            dir.path().join("proj.json"),
            r#"{
  "projectId": "proj",
  "worktree": "/work",
  "sessions": {
    "s1": { "sandboxId": "sb-1", "created": 1700000000000, "lastAccessed": 1700000005000 }
  }
}"#,
        )
        .unwrap();

        let data = store.load("proj").unwrap();
        let record = &data.sessions["s1"];
        assert_eq!(record.sandbox_id, "sb-1");
        assert_eq!(record.created_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(record.last_accessed_at.timestamp_millis(), 1_700_000_005_000);

        let written = serde_json::to_value(&data).unwrap();
        assert_eq!(written["sessions"]["s1"]["lastAccessed"], 1_700_000_005_000_i64);
        assert_eq!(written["projectId"], "proj");
    }

    #[test]
    fn test_invalid_project_id() {
        let dir = tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        assert!(store.project_path("../escape").is_err());
        assert!(store.project_path("").is_err());
        assert!(store.project_path("..").is_err());
        assert!(store.upsert("a/b", "/work", "s1", "sb-1").is_err());
        assert!(store.project_path("global").is_ok());
    }

    #[test]
    fn test_save_fails_when_dir_is_a_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("storage");
        fs::write(&blocker, "").unwrap();
        let store = SessionStore::new(&blocker);

        assert!(store.upsert("proj", "/work", "s1", "sb-1").is_err());
    }
}
