//! Shared types for the mirror engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

// ─── Inventory ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One remote file or directory, addressed by its full remote path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl RemoteEntry {
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// The files discovered by one listing pass below one remote root.
///
/// Keyed by path, so a path is present at most once.
#[derive(Debug, Clone, Default)]
pub struct Inventory {
    pub root: String,
    entries: BTreeMap<String, RemoteEntry>,
    /// Directories whose listing failed; their subtrees are missing.
    pub failed_dirs: Vec<String>,
}

impl Inventory {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            entries: BTreeMap::new(),
            failed_dirs: Vec::new(),
        }
    }

    /// Insert an entry. Returns `false` if the path was already present.
    pub fn insert(&mut self, entry: RemoteEntry) -> bool {
        if self.entries.contains_key(&entry.path) {
            return false;
        }
        self.entries.insert(entry.path.clone(), entry);
        true
    }

    pub fn get(&self, path: &str) -> Option<&RemoteEntry> {
        self.entries.get(path)
    }

    pub fn entries(&self) -> impl Iterator<Item = &RemoteEntry> {
        self.entries.values()
    }

    pub fn paths(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keep only files whose path contains one of `filters`. An empty
    /// filter list keeps everything.
    pub fn retain_matching(&mut self, filters: &[String]) {
        if filters.is_empty() {
            return;
        }
        self.entries
            .retain(|path, _| filters.iter().any(|f| path.contains(f.as_str())));
    }

    /// Whether `path` lies below a directory that could not be listed.
    pub fn is_below_failed_dir(&self, path: &str) -> bool {
        self.failed_dirs.iter().any(|dir| is_below(path, dir))
    }
}

/// Whether remote `path` equals `dir` or lies beneath it.
pub fn is_below(path: &str, dir: &str) -> bool {
    if dir == "/" {
        return path.starts_with('/');
    }
    let dir = dir.trim_end_matches('/');
    path == dir
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
}

// ─── Download tasks ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    Queued,
    Active,
    Done,
    Failed,
}

/// One file to fetch: where it lives remotely and where the raw artifact
/// is written locally.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadTask {
    pub id: usize,
    pub remote_path: String,
    pub local_path: PathBuf,
    pub status: TaskStatus,
}

impl DownloadTask {
    pub fn new(id: usize, remote_path: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            remote_path: remote_path.into(),
            local_path: local_path.into(),
            status: TaskStatus::Queued,
        }
    }
}

// ─── Dispatch results ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactStatus {
    Ok,
    UnpackError,
    ConvertError,
    Unhandled,
}

/// Outcome of dispatching one downloaded artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactResult {
    pub status: ArtifactStatus,
    pub detail: String,
    /// Directory the products were placed in.
    pub destination: Option<PathBuf>,
    /// Final paths of every placed product.
    pub products: Vec<PathBuf>,
}

impl ArtifactResult {
    pub fn ok(destination: impl Into<PathBuf>, products: Vec<PathBuf>, detail: impl Into<String>) -> Self {
        Self {
            status: ArtifactStatus::Ok,
            detail: detail.into(),
            destination: Some(destination.into()),
            products,
        }
    }

    pub fn failed(status: ArtifactStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
            destination: None,
            products: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ArtifactStatus::Ok
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum TaskOutcome {
    /// The download itself failed; nothing was dispatched.
    TransferFailed { error: String },
    /// The download succeeded and the artifact went through dispatch.
    Dispatched { bytes: u64, artifact: ArtifactResult },
}

/// Final word on one download task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskReport {
    pub task: DownloadTask,
    pub outcome: TaskOutcome,
}

impl TaskReport {
    pub fn transfer_failed(mut task: DownloadTask, error: impl Into<String>) -> Self {
        task.status = TaskStatus::Failed;
        Self {
            task,
            outcome: TaskOutcome::TransferFailed {
                error: error.into(),
            },
        }
    }

    /// Downloaded and dispatched with an `Ok` artifact.
    pub fn is_success(&self) -> bool {
        matches!(&self.outcome, TaskOutcome::Dispatched { artifact, .. } if artifact.is_ok())
    }

    pub fn artifact(&self) -> Option<&ArtifactResult> {
        match &self.outcome {
            TaskOutcome::Dispatched { artifact, .. } => Some(artifact),
            TaskOutcome::TransferFailed { .. } => None,
        }
    }
}
