//! Ancillary mode: keep a flat directory of auxiliary files current.
//!
//! There is no snapshot here. Remote files are compared by listing time
//! against the newest file already in the data directory, and whatever is
//! newer is downloaded and moved in unchanged.

use crate::config::{AncillaryConfig, MirrorConfig};
use crate::diff::newer_than;
use crate::dispatch::PlaceFile;
use crate::error::{MirrorError, MirrorResult};
use crate::listing::list_flat;
use crate::mirror::{inbox_path, open_listing_session, prepare_inbox};
use crate::remote::{RemoteConnector, RemoteSession};
use crate::scheduler::Scheduler;
use crate::types::{DownloadTask, Inventory, RemoteEntry, TaskReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// A file already present in the data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub name: String,
    pub modified: DateTime<Utc>,
}

/// Regular files directly inside `dir`, newest first. A missing directory
/// is empty.
pub fn local_files(dir: &Path) -> MirrorResult<Vec<LocalFile>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(MirrorError::Filesystem(format!(
                "reading {}: {}",
                dir.display(),
                e
            )))
        }
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let meta = entry.metadata()?;
        if !meta.is_file() {
            continue;
        }
        files.push(LocalFile {
            path: entry.path(),
            name: entry.file_name().to_string_lossy().into_owned(),
            modified: DateTime::<Utc>::from(meta.modified()?),
        });
    }
    files.sort_by(|a, b| b.modified.cmp(&a.modified).then_with(|| a.name.cmp(&b.name)));
    Ok(files)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AncillaryReport {
    pub listed: usize,
    pub newest_local: Option<DateTime<Utc>>,
    pub tasks: Vec<TaskReport>,
    /// Older local files removed after a replacing set arrived.
    pub replaced: Vec<PathBuf>,
}

impl AncillaryReport {
    pub fn placed(&self) -> usize {
        self.tasks.iter().filter(|t| t.is_success()).count()
    }
}

/// Keep one path per file name, since the data directory is flat. The
/// most recently listed copy wins; ties go to the first path seen.
fn one_per_name(due: Vec<String>, inventory: &Inventory) -> Vec<String> {
    let modified = |path: &str| inventory.get(path).and_then(|e| e.modified);
    let mut chosen: BTreeMap<String, String> = BTreeMap::new();
    for path in due {
        let name = path.rsplit('/').next().unwrap_or(path.as_str()).to_string();
        let dropped = match chosen.get(&name) {
            Some(kept) if modified(kept) >= modified(&path) => path,
            Some(_) => chosen.insert(name, path).unwrap_or_default(),
            None => {
                chosen.insert(name, path);
                continue;
            }
        };
        warn!(path = %dropped, "same file name in another ancillary directory; skipped");
    }
    chosen.into_values().collect()
}

pub struct AncillaryRunner {
    config: MirrorConfig,
    ancillary: AncillaryConfig,
    connector: Arc<dyn RemoteConnector>,
}

impl AncillaryRunner {
    /// Fails with a configuration error when `[ancillary]` is missing.
    pub fn new(config: MirrorConfig, connector: Arc<dyn RemoteConnector>) -> MirrorResult<Self> {
        let ancillary = config
            .ancillary
            .clone()
            .ok_or_else(|| MirrorError::Config("no [ancillary] section configured".to_string()))?;
        if ancillary.remote_dirs.is_empty() {
            return Err(MirrorError::Config("ancillary.remote_dirs is empty".to_string()));
        }
        Ok(Self {
            config,
            ancillary,
            connector,
        })
    }

    fn wanted(&self, entry: &RemoteEntry) -> bool {
        let prefixes = &self.ancillary.name_prefixes;
        prefixes.is_empty() || prefixes.iter().any(|p| entry.file_name().starts_with(p.as_str()))
    }

    pub async fn run(&self) -> MirrorResult<AncillaryReport> {
        let options = self.config.scheduler_options();
        let mut session = open_listing_session(&self.connector, options.connect_timeout).await?;
        let inventory = list_flat(&mut session, &self.ancillary.remote_dirs).await;
        session.close().await;

        let data_dir = &self.ancillary.data_dir;
        let previous = local_files(data_dir)?;
        let newest = previous.first();
        let candidates: Vec<&RemoteEntry> = inventory.entries().filter(|e| self.wanted(e)).collect();
        let due = one_per_name(newer_than(candidates.iter().copied(), newest.map(|f| f.modified)), &inventory);
        info!(
            listed = candidates.len(),
            due = due.len(),
            newest_local = ?newest.map(|f| &f.name),
            "ancillary files checked"
        );

        let mut reports = Vec::new();
        let mut tasks = Vec::with_capacity(due.len());
        for (id, remote_path) in due.iter().enumerate() {
            let task = DownloadTask::new(id, remote_path.as_str(), inbox_path(&self.config.local.ftp_inbox, remote_path));
            match prepare_inbox(&task.local_path) {
                Ok(()) => tasks.push(task),
                Err(e) => reports.push(TaskReport::transfer_failed(task, e.to_string())),
            }
        }

        let sink = Arc::new(PlaceFile::new(data_dir));
        let scheduler = Scheduler::new(self.connector.clone(), options).verbose(self.config.general.verbose);
        reports.extend(scheduler.run(tasks, sink).await);

        let placed: Vec<&Path> = reports
            .iter()
            .filter(|r| r.is_success())
            .flat_map(|r| r.artifact().into_iter().flat_map(|a| a.products.iter().map(PathBuf::as_path)))
            .collect();

        let replacing = newest.is_some_and(|f| {
            self.ancillary
                .replace_markers
                .iter()
                .any(|m| f.name.contains(m.as_str()))
        });
        let mut replaced = Vec::new();
        if replacing && !placed.is_empty() {
            for old in previous.iter().filter(|f| !placed.contains(&f.path.as_path())) {
                match fs::remove_file(&old.path) {
                    Ok(()) => replaced.push(old.path.clone()),
                    Err(e) => warn!(path = %old.path.display(), error = %e, "could not remove replaced file"),
                }
            }
            info!(removed = replaced.len(), "previous set replaced");
        }

        Ok(AncillaryReport {
            listed: candidates.len(),
            newest_local: newest.map(|f| f.modified),
            tasks: reports,
            replaced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GeneralConfig, LocalPaths, ProductRules, RootConfig, ServerConfig};
    use crate::test_support::FakeRemote;
    use chrono::TimeZone;
    use mirror_ftp::DataChannelMode;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> MirrorConfig {
        let base = dir.path();
        MirrorConfig {
            server: ServerConfig {
                host: "fake".into(),
                port: 21,
                username: None,
                password: None,
                netrc: None,
                data_channel_mode: DataChannelMode::Passive,
                concurrency: 2,
                connect_timeout_sec: 5,
                transfer_timeout_sec: 5,
                data_timeout_sec: 5,
                poll_interval_ms: 10,
                use_mlsd: false,
                file_filter: Vec::new(),
            },
            local: LocalPaths {
                ftp_inbox: base.join("inbox"),
                snapshot_dir: base.join("lists"),
                bad_artifact_log: base.join("lists").join("bad.txt"),
            },
            roots: vec![RootConfig {
                remote: "/A".into(),
                data_store: base.join("store"),
                category: None,
            }],
            products: ProductRules::default(),
            ancillary: Some(AncillaryConfig {
                remote_dirs: vec!["/AUX".into()],
                name_prefixes: vec!["Kp_MJD".into(), "ORBCNT".into()],
                data_dir: base.join("aux"),
                replace_markers: vec!["ORBCNT".into()],
            }),
            general: GeneralConfig::default(),
        }
    }

    /// A local file whose mtime is `at`.
    fn local_file_at(dir: &Path, name: &str, at: DateTime<Utc>) {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, b"old").unwrap();
        let secs = at.timestamp() as u64;
        let file = fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs)).unwrap();
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn missing_section_is_a_config_error() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        cfg.ancillary = None;
        let err = AncillaryRunner::new(cfg, Arc::new(FakeRemote::new())).err().unwrap();
        assert!(err.is_config());
    }

    #[test]
    fn local_files_are_newest_first() {
        let dir = TempDir::new().unwrap();
        local_file_at(dir.path(), "a", day(1));
        local_file_at(dir.path(), "b", day(3));
        fs::create_dir(dir.path().join("sub")).unwrap();
        let names: Vec<_> = local_files(dir.path()).unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(local_files(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_data_dir_fetches_every_matching_file() {
        let dir = TempDir::new().unwrap();
        let remote = FakeRemote::new()
            .with_file_at("/AUX/Kp_MJD_1998_QL.dat", b"kp", day(2))
            .with_file("/AUX/Dst_MJD_1998.dat", b"dst");
        let runner = AncillaryRunner::new(config(&dir), Arc::new(remote)).unwrap();

        let report = runner.run().await.unwrap();
        assert_eq!(report.listed, 1);
        assert_eq!(report.placed(), 1);
        assert_eq!(fs::read(dir.path().join("aux/Kp_MJD_1998_QL.dat")).unwrap(), b"kp");
        assert!(!dir.path().join("inbox/AUX/Kp_MJD_1998_QL.dat").exists());
    }

    #[tokio::test]
    async fn same_name_in_two_directories_is_fetched_once() {
        let dir = TempDir::new().unwrap();
        let mut cfg = config(&dir);
        if let Some(aux) = cfg.ancillary.as_mut() {
            aux.remote_dirs = vec!["/AUX".into(), "/AUX2".into()];
        }
        let remote = FakeRemote::new()
            .with_file_at("/AUX/Kp_MJD_2024.dat", b"stale", day(2))
            .with_file_at("/AUX2/Kp_MJD_2024.dat", b"fresh", day(3))
            .with_file_at("/AUX2/ORBCNT_2024.dat", b"orbits", day(1));
        let runner = AncillaryRunner::new(cfg, Arc::new(remote.clone())).unwrap();

        let report = runner.run().await.unwrap();
        assert_eq!(report.placed(), 2);
        let mut fetched = remote.retrieved();
        fetched.sort();
        assert_eq!(fetched, vec!["/AUX2/Kp_MJD_2024.dat", "/AUX2/ORBCNT_2024.dat"]);
        assert_eq!(fs::read(dir.path().join("aux/Kp_MJD_2024.dat")).unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn only_newer_remote_files_are_fetched() {
        let dir = TempDir::new().unwrap();
        let aux = dir.path().join("aux");
        local_file_at(&aux, "Kp_MJD_old.dat", day(5));
        let remote = FakeRemote::new()
            .with_file_at("/AUX/Kp_MJD_older.dat", b"1", day(4))
            .with_file_at("/AUX/Kp_MJD_newer.dat", b"2", day(6));
        let runner = AncillaryRunner::new(config(&dir), Arc::new(remote.clone())).unwrap();

        let report = runner.run().await.unwrap();
        assert_eq!(remote.retrieved(), vec!["/AUX/Kp_MJD_newer.dat"]);
        assert_eq!(report.placed(), 1);
        // No replace marker on the newest local file: nothing removed.
        assert!(report.replaced.is_empty());
        assert!(aux.join("Kp_MJD_old.dat").exists());
    }

    #[tokio::test]
    async fn orbit_count_set_replaces_previous_files() {
        let dir = TempDir::new().unwrap();
        let aux = dir.path().join("aux");
        local_file_at(&aux, "ORBCNT_2024_03_01.txt", day(5));
        local_file_at(&aux, "ORBCNT_2024_02_01.txt", day(1));
        let remote = FakeRemote::new().with_file_at("/AUX/ORBCNT_2024_04_01.txt", b"new", day(7));
        let runner = AncillaryRunner::new(config(&dir), Arc::new(remote)).unwrap();

        let report = runner.run().await.unwrap();
        assert_eq!(report.replaced.len(), 2);
        let names: Vec<_> = local_files(&aux).unwrap().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["ORBCNT_2024_04_01.txt"]);
    }

    #[tokio::test]
    async fn nothing_new_keeps_previous_files() {
        let dir = TempDir::new().unwrap();
        let aux = dir.path().join("aux");
        local_file_at(&aux, "ORBCNT_2024_03_01.txt", day(5));
        let remote = FakeRemote::new().with_file_at("/AUX/ORBCNT_2024_03_01.txt", b"same", day(5));
        let runner = AncillaryRunner::new(config(&dir), Arc::new(remote.clone())).unwrap();

        let report = runner.run().await.unwrap();
        assert!(report.tasks.is_empty());
        assert!(report.replaced.is_empty());
        assert!(remote.retrieved().is_empty());
    }
}
