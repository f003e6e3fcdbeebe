//! Text edits against a sandbox filesystem.
//!
//! The remote side only offers whole-file download and upload, so every
//! mutation is one download, an in-memory transform and one upload. If the
//! upload fails nothing is visible remotely.
//!
//! Replacements hit the first occurrence only. A replacement whose target
//! is absent is not an error: the content is uploaded unchanged.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sandbox::{Match, RemoteSandbox, SandboxResult};

/// One `old → new` replacement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EditPair {
    pub old_string: String,
    pub new_string: String,
}

/// How many replacements of a request actually matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EditOutcome {
    pub applied: usize,
    pub requested: usize,
}

/// Replace the first occurrence of `old` in `content`.
///
/// Returns the new content and whether a match was found.
pub(crate) fn replace_first(content: &str, old: &str, new: &str) -> (String, bool) {
    match content.find(old) {
        Some(idx) => {
            let mut out = String::with_capacity(content.len() - old.len() + new.len());
            out.push_str(&content[..idx]);
            out.push_str(new);
            out.push_str(&content[idx + old.len()..]);
            (out, true)
        }
        None => (content.to_string(), false),
    }
}

/// Apply pairs in order, each against the result of the previous one.
pub(crate) fn apply_edits(content: &str, edits: &[EditPair]) -> (String, EditOutcome) {
    let mut current = content.to_string();
    let mut applied = 0;

    for edit in edits {
        let (next, matched) = replace_first(&current, &edit.old_string, &edit.new_string);
        current = next;
        if matched {
            applied += 1;
        }
    }

    (
        current,
        EditOutcome {
            applied,
            requested: edits.len(),
        },
    )
}

/// Filesystem view over one sandbox.
pub(crate) struct RemoteFs<'a> {
    sandbox: &'a dyn RemoteSandbox,
}

impl<'a> RemoteFs<'a> {
    pub fn new(sandbox: &'a dyn RemoteSandbox) -> Self {
        Self { sandbox }
    }

    /// Download and decode a file.
    pub async fn read(&self, path: &str) -> SandboxResult<String> {
        let bytes = self.sandbox.download_file(path).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Create or overwrite a file. Returns the number of bytes written.
    pub async fn write(&self, path: &str, content: &str) -> SandboxResult<usize> {
        let bytes = content.as_bytes().to_vec();
        let len = bytes.len();
        self.sandbox.upload_file(bytes, path).await?;
        Ok(len)
    }

    /// Replace the first occurrence of `old` with `new`.
    pub async fn edit(&self, path: &str, old: &str, new: &str) -> SandboxResult<EditOutcome> {
        let edit = EditPair {
            old_string: old.to_string(),
            new_string: new.to_string(),
        };
        self.multi_edit(path, std::slice::from_ref(&edit)).await
    }

    /// Apply several replacements in one round trip.
    pub async fn multi_edit(&self, path: &str, edits: &[EditPair]) -> SandboxResult<EditOutcome> {
        let content = self.read(path).await?;
        let (updated, outcome) = apply_edits(&content, edits);

        if outcome.applied < outcome.requested {
            debug!(
                "{} of {} replacements in {} found no match",
                outcome.requested - outcome.applied,
                outcome.requested,
                path
            );
        }

        self.write(path, &updated).await?;
        Ok(outcome)
    }

    /// Snippet replacement; same algorithm as [`RemoteFs::edit`].
    pub async fn patch(
        &self,
        path: &str,
        old_snippet: &str,
        new_snippet: &str,
    ) -> SandboxResult<EditOutcome> {
        self.edit(path, old_snippet, new_snippet).await
    }

    /// Names of the entries in `path`, or in the working directory.
    pub async fn list(&self, path: Option<&str>) -> SandboxResult<Vec<String>> {
        let dir = match path {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => self.sandbox.work_dir().await?,
        };
        let entries = self.sandbox.list_files(&dir).await?;
        Ok(entries.into_iter().map(|f| f.name).collect())
    }

    /// Paths under the working directory matching a glob.
    pub async fn glob(&self, pattern: &str) -> SandboxResult<Vec<String>> {
        let root = self.sandbox.work_dir().await?;
        self.sandbox.search_files(&root, pattern).await
    }

    /// Lines under the working directory containing `pattern`.
    pub async fn grep(&self, pattern: &str) -> SandboxResult<Vec<Match>> {
        let root = self.sandbox.work_dir().await?;
        self.sandbox.find_in_files(&root, pattern).await
    }
}
