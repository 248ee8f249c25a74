//! In-memory remote tree and archive fixtures shared by the unit tests.

use crate::remote::{RemoteConnector, RemoteSession};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use mirror_ftp::{FtpEntry, FtpEntryKind, FtpError, FtpResult};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct FakeState {
    dirs: BTreeMap<String, Vec<FtpEntry>>,
    files: HashMap<String, Vec<u8>>,
    failing_dirs: HashSet<String>,
    failing_files: HashSet<String>,
    /// Listing one of these drops the connection, once.
    dropping_dirs: HashSet<String>,
    refuse_connect: bool,
    delay: Duration,
    active: usize,
    peak: usize,
    connects: usize,
    listed: Vec<String>,
    retrieved: Vec<String>,
}

fn parent_of(path: &str) -> (String, String) {
    match path.rsplit_once('/') {
        Some(("", name)) => ("/".to_string(), name.to_string()),
        Some((dir, name)) => (dir.to_string(), name.to_string()),
        None => ("/".to_string(), path.to_string()),
    }
}

impl FakeState {
    fn ensure_dir(&mut self, dir: &str) {
        if self.dirs.contains_key(dir) {
            return;
        }
        self.dirs.insert(dir.to_string(), Vec::new());
        if dir != "/" {
            let (parent, name) = parent_of(dir);
            self.ensure_dir(&parent);
            if let Some(listing) = self.dirs.get_mut(&parent) {
                listing.push(FtpEntry::new(name, FtpEntryKind::Directory));
            }
        }
    }

    fn put_file(&mut self, path: &str, bytes: &[u8], modified: Option<DateTime<Utc>>) {
        let (dir, name) = parent_of(path);
        self.ensure_dir(&dir);
        if let Some(listing) = self.dirs.get_mut(&dir) {
            listing.retain(|e| e.name != name);
            let mut entry = FtpEntry::new(name, FtpEntryKind::File);
            entry.size = bytes.len() as u64;
            entry.modified = modified;
            listing.push(entry);
        }
        self.files.insert(path.to_string(), bytes.to_vec());
    }
}

/// A remote host backed by memory. Cloning shares the same tree.
#[derive(Clone, Default)]
pub(crate) struct FakeRemote {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRemote {
    pub fn new() -> Self {
        let remote = Self::default();
        remote.lock().ensure_dir("/");
        remote
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn with_file(self, path: &str, bytes: &[u8]) -> Self {
        self.lock().put_file(path, bytes, None);
        self
    }

    pub fn with_file_at(self, path: &str, bytes: &[u8], modified: DateTime<Utc>) -> Self {
        self.lock().put_file(path, bytes, Some(modified));
        self
    }

    pub fn failing_dir(self, dir: &str) -> Self {
        self.lock().failing_dirs.insert(dir.to_string());
        self
    }

    pub fn failing_file(self, path: &str) -> Self {
        self.lock().failing_files.insert(path.to_string());
        self
    }

    /// The first session to list `dir` loses its connection there.
    pub fn dropping_at(self, dir: &str) -> Self {
        self.lock().dropping_dirs.insert(dir.to_string());
        self
    }

    pub fn refusing_login(self) -> Self {
        self.lock().refuse_connect = true;
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.lock().delay = delay;
        self
    }

    /// Replace a file's content in place (e.g. a fixed upstream product).
    pub fn put_file(&self, path: &str, bytes: &[u8]) {
        self.lock().put_file(path, bytes, None);
    }

    pub fn heal_file(&self, path: &str) {
        self.lock().failing_files.remove(path);
    }

    pub fn listed_dirs(&self) -> Vec<String> {
        self.lock().listed.clone()
    }

    pub fn retrieved(&self) -> Vec<String> {
        self.lock().retrieved.clone()
    }

    pub fn peak_active(&self) -> usize {
        self.lock().peak
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }
}

#[async_trait]
impl RemoteConnector for FakeRemote {
    async fn connect(&self) -> FtpResult<Box<dyn RemoteSession>> {
        let mut state = self.lock();
        state.connects += 1;
        if state.refuse_connect {
            return Err(FtpError::from_reply(530, "530 Login incorrect"));
        }
        Ok(Box::new(FakeSession {
            state: self.state.clone(),
            lost: false,
        }))
    }

    fn describe(&self) -> String {
        "fake://memory".to_string()
    }
}

struct FakeSession {
    state: Arc<Mutex<FakeState>>,
    lost: bool,
}

impl FakeSession {
    fn check_connection(&self) -> FtpResult<()> {
        if self.lost {
            return Err(FtpError::disconnected("server closed the control connection"));
        }
        Ok(())
    }
}

/// Keeps the active-transfer gauge right even when a retrieval is dropped
/// by a timeout.
struct ActiveGuard(Arc<Mutex<FakeState>>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.lock() {
            state.active -= 1;
        }
    }
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn list_dir(&mut self, dir: &str) -> FtpResult<Vec<FtpEntry>> {
        self.check_connection()?;
        let mut state = self.state.lock().unwrap();
        state.listed.push(dir.to_string());
        if state.dropping_dirs.remove(dir) {
            self.lost = true;
            return Err(FtpError::disconnected("server closed the control connection"));
        }
        if state.failing_dirs.contains(dir) {
            return Err(FtpError::from_reply(550, "550 Permission denied"));
        }
        state
            .dirs
            .get(dir)
            .cloned()
            .ok_or_else(|| FtpError::from_reply(550, "550 No such directory"))
    }

    async fn retrieve(&mut self, remote_path: &str, local_path: &Path) -> FtpResult<u64> {
        self.check_connection()?;
        let (bytes, delay) = {
            let mut state = self.state.lock().unwrap();
            if state.failing_files.contains(remote_path) {
                return Err(FtpError::transfer_failed(format!("{}: connection reset", remote_path)));
            }
            let bytes = state
                .files
                .get(remote_path)
                .cloned()
                .ok_or_else(|| FtpError::from_reply(550, "550 No such file"))?;
            state.active += 1;
            state.peak = state.peak.max(state.active);
            (bytes, state.delay)
        };
        let _guard = ActiveGuard(self.state.clone());

        tokio::time::sleep(delay).await;
        if let Some(parent) = local_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(local_path, &bytes).await?;
        self.state
            .lock()
            .unwrap()
            .retrieved
            .push(remote_path.to_string());
        Ok(bytes.len() as u64)
    }

    async fn close(&mut self) {}
}

// ── Archive fixtures ─────────────────────────────────────────────────

pub(crate) fn tar_bytes(members: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap()
}

pub(crate) fn tgz_bytes(members: &[(&str, &str)]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar_bytes(members)).unwrap();
    encoder.finish().unwrap()
}

pub(crate) const XML_DOC: &[u8] = b"<?xml version=\"1.0\"?>\n<Earth_Explorer_File/>\n";
