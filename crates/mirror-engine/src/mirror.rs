//! One mirror run: every configured root, one after the other.
//!
//! Per root: list the remote tree, diff it against the stored snapshot
//! (minus artifacts that failed last time), download and dispatch what is
//! new, then store the successfully handled part of the listing as the
//! next snapshot.

use crate::config::{MirrorConfig, RootConfig};
use crate::diff::diff;
use crate::dispatch::Dispatcher;
use crate::error::{MirrorError, MirrorResult};
use crate::listing::{list_tree, normalize_root};
use crate::remote::{ReconnectingSession, RemoteConnector, RemoteSession};
use crate::scheduler::{PoolObserver, Scheduler};
use crate::snapshot::{BadArtifactLog, Snapshot, SnapshotStore};
use crate::types::{DownloadTask, Inventory, TaskReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// ─── Reports ─────────────────────────────────────────────────────────

/// What happened to one remote root.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RootReport {
    pub remote_root: String,
    pub category: String,
    pub listed: usize,
    pub failed_dirs: Vec<String>,
    /// Paths struck from the snapshot because their artifact failed before.
    pub retried_bad_artifacts: Vec<String>,
    /// Gone from the remote since the last run; left untouched locally.
    pub not_on_remote: Vec<String>,
    pub tasks: Vec<TaskReport>,
    pub snapshot_entries: usize,
    pub snapshot_error: Option<String>,
}

impl RootReport {
    pub fn succeeded(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.tasks.len() - self.succeeded()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorReport {
    pub host: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub roots: Vec<RootReport>,
}

impl MirrorReport {
    pub fn scheduled(&self) -> usize {
        self.roots.iter().map(|r| r.tasks.len()).sum()
    }

    pub fn failed(&self) -> usize {
        self.roots.iter().map(RootReport::failed).sum()
    }
}

/// Local inbox path for a remote file: the remote path below `inbox`.
pub fn inbox_path(inbox: &Path, remote_path: &str) -> PathBuf {
    inbox.join(remote_path.trim_start_matches('/'))
}

/// Open the session used for listing. Failing here ends the run; later
/// connection losses are handled by the session itself.
pub(crate) async fn open_listing_session(
    connector: &Arc<dyn RemoteConnector>,
    connect_timeout: Duration,
) -> MirrorResult<ReconnectingSession> {
    ReconnectingSession::open(connector.clone(), connect_timeout)
        .await
        .map_err(MirrorError::Remote)
}

// ─── Engine ──────────────────────────────────────────────────────────

pub struct MirrorEngine {
    config: MirrorConfig,
    connector: Arc<dyn RemoteConnector>,
    store: SnapshotStore,
    bad_log: Arc<BadArtifactLog>,
    observer: Option<PoolObserver>,
}

impl MirrorEngine {
    pub fn new(config: MirrorConfig, connector: Arc<dyn RemoteConnector>) -> Self {
        let store = SnapshotStore::new(&config.local.snapshot_dir);
        let bad_log = Arc::new(BadArtifactLog::new(
            &config.local.bad_artifact_log,
            &config.local.ftp_inbox,
        ));
        Self {
            config,
            connector,
            store,
            bad_log,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: PoolObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub async fn run(&self) -> MirrorResult<MirrorReport> {
        let started_at = Utc::now();
        let host = self.connector.describe();
        let options = self.config.scheduler_options();
        let mut session = open_listing_session(&self.connector, options.connect_timeout).await?;
        info!(host = %host, roots = self.config.roots.len(), "mirror run started");

        let mut roots = Vec::with_capacity(self.config.roots.len());
        for root in &self.config.roots {
            roots.push(self.mirror_root(&mut session, root).await);
        }
        if session.reconnects() > 0 {
            info!(reconnects = session.reconnects(), "listing session was reopened during the run");
        }
        session.close().await;

        let report = MirrorReport {
            host,
            started_at,
            finished_at: Utc::now(),
            roots,
        };
        info!(
            scheduled = report.scheduled(),
            failed = report.failed(),
            "mirror run finished"
        );
        Ok(report)
    }

    async fn mirror_root(&self, session: &mut dyn RemoteSession, root: &RootConfig) -> RootReport {
        let remote_root = normalize_root(&root.remote);
        let category = root.category();
        let inventory = list_tree(session, &remote_root, &self.config.server.file_filter).await;

        let snapshot = self.store.load(&category).unwrap_or_else(|e| {
            warn!(root = %remote_root, error = %e, "snapshot unreadable, starting from empty");
            Snapshot::default()
        });
        let retried = self.bad_log.drain_under(&remote_root).unwrap_or_else(|e| {
            warn!(root = %remote_root, error = %e, "bad-artifact log unreadable");
            Vec::new()
        });
        if !retried.is_empty() {
            info!(root = %remote_root, count = retried.len(), "retrying previously failed artifacts");
        }
        let baseline = SnapshotStore::merge_bad_artifacts(&snapshot, &retried);

        let changes = diff(&inventory.paths(), baseline.paths());
        let not_on_remote: Vec<String> = changes
            .to_remove
            .iter()
            .filter(|p| !inventory.is_below_failed_dir(p))
            .cloned()
            .collect();
        if !not_on_remote.is_empty() {
            info!(
                root = %remote_root,
                count = not_on_remote.len(),
                "entries no longer on remote; nothing removed locally"
            );
            for path in &not_on_remote {
                debug!(path = %path, "not on remote");
            }
        }
        info!(root = %remote_root, new = changes.to_download.len(), "differences computed");

        let mut reports = Vec::new();
        let mut tasks = Vec::with_capacity(changes.to_download.len());
        for (id, remote_path) in changes.to_download.iter().enumerate() {
            let task = DownloadTask::new(id, remote_path.as_str(), inbox_path(&self.config.local.ftp_inbox, remote_path));
            match prepare_inbox(&task.local_path) {
                Ok(()) => tasks.push(task),
                Err(e) => {
                    warn!(path = %remote_path, error = %e, "cannot prepare inbox");
                    reports.push(TaskReport::transfer_failed(task, e.to_string()));
                }
            }
        }

        let sink = Arc::new(Dispatcher::new(
            &root.data_store,
            self.config.products.clone(),
            self.bad_log.clone(),
        ));
        let mut scheduler = Scheduler::new(self.connector.clone(), self.config.scheduler_options())
            .verbose(self.config.general.verbose);
        if let Some(observer) = &self.observer {
            scheduler = scheduler.with_observer(observer.clone());
        }
        reports.extend(scheduler.run(tasks, sink).await);

        let next = next_snapshot(&inventory, &baseline, &reports);
        let snapshot_error = match self.store.save(&category, &next) {
            Ok(()) => None,
            Err(e) => {
                warn!(root = %remote_root, error = %e, "snapshot not saved");
                Some(e.to_string())
            }
        };

        RootReport {
            remote_root,
            category,
            listed: inventory.len(),
            failed_dirs: inventory.failed_dirs.clone(),
            retried_bad_artifacts: retried,
            not_on_remote,
            tasks: reports,
            snapshot_entries: next.len(),
            snapshot_error,
        }
    }
}

pub(crate) fn prepare_inbox(local_path: &Path) -> MirrorResult<()> {
    if let Some(parent) = local_path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| MirrorError::Filesystem(format!("creating {}: {}", parent.display(), e)))?;
    }
    Ok(())
}

/// The listing minus everything that did not make it through, plus the old
/// entries of subtrees that could not be listed this time.
fn next_snapshot(inventory: &Inventory, baseline: &Snapshot, reports: &[TaskReport]) -> BTreeSet<String> {
    let mut next = inventory.paths();
    for report in reports.iter().filter(|r| !r.is_success()) {
        next.remove(&report.task.remote_path);
    }
    next.extend(
        baseline
            .paths()
            .iter()
            .filter(|p| inventory.is_below_failed_dir(p))
            .cloned(),
    );
    next
}
