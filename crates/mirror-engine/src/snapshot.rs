//! Snapshot Store and bad-artifact log.
//!
//! A snapshot is the list of remote paths handled successfully by the
//! previous run for one remote root, one path per line. The bad-artifact
//! log collects raw artifacts (as local inbox paths) that failed dispatch,
//! so the next run can strike them from the snapshot and fetch them again.

use crate::error::{MirrorError, MirrorResult};
use crate::types::is_below;
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Snapshot category for a remote root: the root path with separators
/// folded to `_`.
pub fn category_for(root: &str) -> String {
    let folded = root.trim_matches('/').replace('/', "_");
    if folded.is_empty() {
        "root".to_string()
    } else {
        folded
    }
}

/// Write `contents` next to `target` and rename it over `target`.
fn write_atomic(target: &Path, contents: &str) -> MirrorResult<()> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)
        .map_err(|e| MirrorError::Snapshot(format!("temp file in {}: {}", dir.display(), e)))?;
    tmp.write_all(contents.as_bytes())
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| MirrorError::Snapshot(format!("writing {}: {}", target.display(), e)))?;
    tmp.persist(target)
        .map_err(|e| MirrorError::Snapshot(format!("renaming into {}: {}", target.display(), e.error)))?;
    Ok(())
}

fn read_lines(path: &Path) -> MirrorResult<Option<Vec<String>>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        )),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(MirrorError::Snapshot(format!("reading {}: {}", path.display(), e))),
    }
}

// ─── Snapshot ────────────────────────────────────────────────────────

/// The previous run's inventory, as remote paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    paths: BTreeSet<String>,
}

impl Snapshot {
    pub fn paths(&self) -> &BTreeSet<String> {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FromIterator<String> for Snapshot {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            paths: iter.into_iter().collect(),
        }
    }
}

pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, category: &str) -> PathBuf {
        self.dir.join(format!("ftp_list_{}.txt", category))
    }

    pub fn previous_path_for(&self, category: &str) -> PathBuf {
        self.dir.join(format!("ftp_list_{}.prev.txt", category))
    }

    /// Load the snapshot for `category`; empty when none was saved yet.
    pub fn load(&self, category: &str) -> MirrorResult<Snapshot> {
        let path = self.path_for(category);
        let lines = read_lines(&path)?.unwrap_or_default();
        debug!(path = %path.display(), entries = lines.len(), "snapshot loaded");
        Ok(lines.into_iter().collect())
    }

    /// Replace the snapshot for `category` with `paths`.
    ///
    /// The current file is copied to the `.prev.txt` sibling first; the new
    /// one is written to a temp file and renamed into place.
    pub fn save(&self, category: &str, paths: &BTreeSet<String>) -> MirrorResult<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| MirrorError::Snapshot(format!("creating {}: {}", self.dir.display(), e)))?;
        let target = self.path_for(category);
        if target.exists() {
            fs::copy(&target, self.previous_path_for(category))
                .map_err(|e| MirrorError::Snapshot(format!("keeping previous snapshot: {}", e)))?;
        }

        let mut body = String::new();
        for path in paths {
            body.push_str(path);
            body.push('\n');
        }
        write_atomic(&target, &body)?;
        info!(path = %target.display(), entries = paths.len(), "snapshot saved");
        Ok(())
    }

    /// Strike `bad` remote paths from `snapshot`.
    pub fn merge_bad_artifacts(snapshot: &Snapshot, bad: &[String]) -> Snapshot {
        let mut paths = snapshot.paths.clone();
        for path in bad {
            paths.remove(path);
        }
        Snapshot { paths }
    }
}

// ─── Bad-artifact log ────────────────────────────────────────────────

/// Append-only list of raw artifacts that failed dispatch.
///
/// Lines are local inbox paths; [`BadArtifactLog::entries`] maps them back
/// to remote paths by stripping the inbox prefix.
pub struct BadArtifactLog {
    path: PathBuf,
    inbox: PathBuf,
    lock: Mutex<()>,
}

impl BadArtifactLog {
    pub fn new(path: impl Into<PathBuf>, inbox: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            inbox: inbox.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, local_path: &Path) -> MirrorResult<()> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| MirrorError::Snapshot(format!("opening {}: {}", self.path.display(), e)))?;
        writeln!(file, "{}", local_path.display())
            .map_err(|e| MirrorError::Snapshot(format!("appending to {}: {}", self.path.display(), e)))?;
        Ok(())
    }

    /// Remote path for a logged line.
    pub fn remote_path_of(&self, line: &str) -> String {
        match Path::new(line).strip_prefix(&self.inbox) {
            Ok(rel) => {
                let parts: Vec<String> = rel
                    .components()
                    .filter_map(|c| match c {
                        Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                        _ => None,
                    })
                    .collect();
                format!("/{}", parts.join("/"))
            }
            Err(_) => line.to_string(),
        }
    }

    /// Every logged artifact, as remote paths.
    pub fn entries(&self) -> MirrorResult<Vec<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        Ok(read_lines(&self.path)?
            .unwrap_or_default()
            .iter()
            .map(|l| self.remote_path_of(l))
            .collect())
    }

    /// Remove and return the logged artifacts below remote `root`. The log
    /// file is deleted once nothing else is left in it.
    pub fn drain_under(&self, root: &str) -> MirrorResult<Vec<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|p| p.into_inner());
        let Some(lines) = read_lines(&self.path)? else {
            return Ok(Vec::new());
        };

        let mut taken = Vec::new();
        let mut kept = Vec::new();
        for line in lines {
            let remote = self.remote_path_of(&line);
            if is_below(&remote, root) {
                taken.push(remote);
            } else {
                kept.push(line);
            }
        }

        if kept.is_empty() {
            fs::remove_file(&self.path).map_err(|e| {
                MirrorError::Snapshot(format!("removing {}: {}", self.path.display(), e))
            })?;
        } else if !taken.is_empty() {
            let mut body = kept.join("\n");
            body.push('\n');
            write_atomic(&self.path, &body)?;
        }
        Ok(taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    // ── Snapshot store ───────────────────────────────────────────────

    #[test]
    fn missing_snapshot_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert!(store.load("L1B").unwrap().is_empty());
    }

    #[test]
    fn save_then_load_and_keep_previous() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("lists"));
        store.save("L1B", &set(&["/A/1", "/A/2"])).unwrap();
        store.save("L1B", &set(&["/A/3"])).unwrap();

        assert_eq!(store.load("L1B").unwrap().paths(), &set(&["/A/3"]));
        let prev = fs::read_to_string(store.previous_path_for("L1B")).unwrap();
        assert_eq!(prev, "/A/1\n/A/2\n");
        // Nothing but the two snapshot files is left behind.
        assert_eq!(fs::read_dir(dir.path().join("lists")).unwrap().count(), 2);
    }

    #[test]
    fn categories_are_independent() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        store.save("a", &set(&["/a/1"])).unwrap();
        store.save("b", &set(&["/b/1"])).unwrap();
        assert_eq!(store.load("a").unwrap().len(), 1);
        assert_eq!(store.load("b").unwrap().paths(), &set(&["/b/1"]));
    }

    #[test]
    fn merge_strikes_bad_paths() {
        let snap: Snapshot = ["/A/1", "/A/2"].iter().map(|s| s.to_string()).collect();
        let merged = SnapshotStore::merge_bad_artifacts(&snap, &["/A/2".to_string(), "/Z".to_string()]);
        assert_eq!(merged.paths(), &set(&["/A/1"]));
    }

    #[test]
    fn category_folds_separators() {
        assert_eq!(category_for("/ADM/L1B_L2/current/"), "ADM_L1B_L2_current");
        assert_eq!(category_for("/"), "root");
    }

    // ── Bad-artifact log ─────────────────────────────────────────────

    #[test]
    fn log_maps_inbox_paths_back_to_remote() {
        let dir = TempDir::new().unwrap();
        let inbox = dir.path().join("inbox");
        let log = BadArtifactLog::new(dir.path().join("bad.txt"), &inbox);
        log.append(&inbox.join("A").join("f1.TGZ")).unwrap();
        log.append(&inbox.join("B").join("g.zip")).unwrap();
        assert_eq!(log.entries().unwrap(), vec!["/A/f1.TGZ", "/B/g.zip"]);
    }

    #[test]
    fn drain_takes_only_entries_below_root() {
        let dir = TempDir::new().unwrap();
        let inbox = dir.path().join("inbox");
        let log = BadArtifactLog::new(dir.path().join("bad.txt"), &inbox);
        log.append(&inbox.join("A").join("f1.TGZ")).unwrap();
        log.append(&inbox.join("B").join("g.zip")).unwrap();

        assert_eq!(log.drain_under("/A").unwrap(), vec!["/A/f1.TGZ"]);
        assert_eq!(log.entries().unwrap(), vec!["/B/g.zip"]);

        assert_eq!(log.drain_under("/B").unwrap(), vec!["/B/g.zip"]);
        assert!(!log.path().exists());
        assert!(log.drain_under("/B").unwrap().is_empty());
    }
}
