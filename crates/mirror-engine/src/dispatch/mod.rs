//! Artifact Dispatcher.
//!
//! A downloaded artifact is classified by content, never by its name alone,
//! and routed to one handling strategy:
//!
//! | Content                 | Strategy                     |
//! |-------------------------|------------------------------|
//! | XML                     | copied to the data store     |
//! | gzip with archive suffix| tar extraction (gzip)        |
//! | tar                     | tar extraction               |
//! | zip                     | reported as unpack error     |
//! | anything else           | reported as unhandled        |
//!
//! The raw artifact is always removed from the inbox afterwards; failures
//! are recorded in the [`BadArtifactLog`] so the next run fetches them
//! again.

pub mod extract;
pub mod sniff;

use crate::config::ProductRules;
use crate::error::MirrorError;
use crate::snapshot::BadArtifactLog;
use crate::types::{ArtifactResult, ArtifactStatus, DownloadTask};
use sniff::{ContentSniffer, ContentType, SignatureSniffer, SNIFF_LEN};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// How an artifact is handled once its content type is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Copy,
    ExtractTar { gzip: bool },
    Unzip,
    Unhandled,
}

/// Pick the handling strategy for an artifact.
pub fn route(content: ContentType, file_name: &str, archive_suffixes: &[String]) -> Strategy {
    match content {
        ContentType::Xml => Strategy::Copy,
        ContentType::Gzip if archive_suffixes.iter().any(|s| file_name.ends_with(s.as_str())) => {
            Strategy::ExtractTar { gzip: true }
        }
        ContentType::Gzip => Strategy::Unhandled,
        ContentType::Tar => Strategy::ExtractTar { gzip: false },
        ContentType::Zip => Strategy::Unzip,
        ContentType::Unknown => Strategy::Unhandled,
    }
}

/// Receives each successfully downloaded artifact.
///
/// Called on the blocking pool, once per task, and must always produce a
/// result.
pub trait ArtifactSink: Send + Sync {
    fn finish(&self, task: &DownloadTask) -> ArtifactResult;
}

fn read_head(path: &Path) -> io::Result<Vec<u8>> {
    let mut head = Vec::with_capacity(SNIFF_LEN);
    File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut head)?;
    Ok(head)
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn remove_raw(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove raw artifact"),
    }
}

// ─── Dispatcher ──────────────────────────────────────────────────────

/// Dispatches the artifacts of one remote root into its data store.
pub struct Dispatcher {
    destination: PathBuf,
    rules: ProductRules,
    sniffer: Box<dyn ContentSniffer>,
    bad_log: Arc<BadArtifactLog>,
}

impl Dispatcher {
    pub fn new(destination: impl Into<PathBuf>, rules: ProductRules, bad_log: Arc<BadArtifactLog>) -> Self {
        Self {
            destination: destination.into(),
            rules,
            sniffer: Box::new(SignatureSniffer),
            bad_log,
        }
    }

    pub fn with_sniffer(mut self, sniffer: Box<dyn ContentSniffer>) -> Self {
        self.sniffer = sniffer;
        self
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Classify and handle the raw artifact at `raw`. Leaves `raw` in place.
    pub fn dispatch(&self, raw: &Path) -> ArtifactResult {
        let head = match read_head(raw) {
            Ok(head) => head,
            Err(e) => {
                return failure(MirrorError::Unpack(format!("reading {}: {}", raw.display(), e)))
            }
        };
        let content = self.sniffer.detect(&head);
        let name = file_name_of(raw);
        let strategy = route(content, &name, &self.rules.archive_suffixes);
        debug!(artifact = %name, ?content, ?strategy, "routing artifact");

        match strategy {
            Strategy::Copy => match self.copy_into_store(raw, &name) {
                Ok(placed) => ArtifactResult::ok(&self.destination, vec![placed], "xml copied"),
                Err(e) => failure(e),
            },
            Strategy::ExtractTar { gzip } => {
                match extract::extract_products(raw, gzip, &self.destination, &self.rules) {
                    Ok(products) => {
                        let detail = format!("{} product(s) extracted", products.len());
                        ArtifactResult::ok(&self.destination, products, detail)
                    }
                    Err(e) => failure(e),
                }
            }
            Strategy::Unzip => failure(MirrorError::Unpack(format!(
                "{}: zip artifacts are not supported",
                name
            ))),
            Strategy::Unhandled => ArtifactResult::failed(
                ArtifactStatus::Unhandled,
                format!("{}: no handler for {:?} content", name, content),
            ),
        }
    }

    /// Copy into the store through a temp file in the same directory.
    fn copy_into_store(&self, raw: &Path, name: &str) -> Result<PathBuf, MirrorError> {
        let convert = |what: &str, e: &dyn std::fmt::Display| {
            MirrorError::Convert(format!("{} {}: {}", what, name, e))
        };
        fs::create_dir_all(&self.destination).map_err(|e| convert("creating store for", &e))?;
        let mut tmp = NamedTempFile::new_in(&self.destination).map_err(|e| convert("staging", &e))?;
        let mut src = File::open(raw).map_err(|e| convert("opening", &e))?;
        io::copy(&mut src, tmp.as_file_mut()).map_err(|e| convert("copying", &e))?;
        let target = self.destination.join(name);
        tmp.persist(&target).map_err(|e| convert("placing", &e.error))?;
        Ok(target)
    }
}

fn failure(err: MirrorError) -> ArtifactResult {
    let status = match err {
        MirrorError::Convert(_) | MirrorError::Filesystem(_) => ArtifactStatus::ConvertError,
        _ => ArtifactStatus::UnpackError,
    };
    ArtifactResult::failed(status, err.to_string())
}

impl ArtifactSink for Dispatcher {
    fn finish(&self, task: &DownloadTask) -> ArtifactResult {
        let result = self.dispatch(&task.local_path);
        remove_raw(&task.local_path);

        if result.is_ok() {
            info!(
                path = %task.remote_path,
                products = result.products.len(),
                destination = %self.destination.display(),
                "artifact dispatched"
            );
        } else {
            warn!(
                path = %task.remote_path,
                status = ?result.status,
                detail = %result.detail,
                "artifact not dispatched"
            );
            if let Err(e) = self.bad_log.append(&task.local_path) {
                warn!(path = %task.remote_path, error = %e, "could not record bad artifact");
            }
        }
        result
    }
}

// ─── Plain placement ─────────────────────────────────────────────────

/// Moves downloaded files unchanged into one directory.
pub struct PlaceFile {
    dest: PathBuf,
}

impl PlaceFile {
    pub fn new(dest: impl Into<PathBuf>) -> Self {
        Self { dest: dest.into() }
    }

    fn place(&self, raw: &Path) -> Result<PathBuf, MirrorError> {
        let name = raw
            .file_name()
            .ok_or_else(|| MirrorError::Filesystem(format!("{} has no file name", raw.display())))?;
        fs::create_dir_all(&self.dest)?;
        let target = self.dest.join(name);
        if fs::rename(raw, &target).is_err() {
            // Inbox and data directory may be on different filesystems.
            fs::copy(raw, &target)?;
            fs::remove_file(raw)?;
        }
        Ok(target)
    }
}

impl ArtifactSink for PlaceFile {
    fn finish(&self, task: &DownloadTask) -> ArtifactResult {
        match self.place(&task.local_path) {
            Ok(target) => {
                debug!(path = %task.remote_path, target = %target.display(), "placed");
                ArtifactResult::ok(&self.dest, vec![target], "placed")
            }
            Err(e) => {
                remove_raw(&task.local_path);
                ArtifactResult::failed(ArtifactStatus::ConvertError, e.to_string())
            }
        }
    }
}
