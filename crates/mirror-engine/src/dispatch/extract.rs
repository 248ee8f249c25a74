//! Tar extraction of product archives.
//!
//! An archive is accepted only as a whole: every member must be a product
//! payload or a product header, otherwise nothing is extracted. Payloads
//! are unpacked into a staging directory inside the destination and then
//! renamed into place; headers are skipped.

use crate::config::ProductRules;
use crate::error::{MirrorError, MirrorResult};
use flate2::read::GzDecoder;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar::Archive;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberClass {
    Payload,
    Header,
    Invalid,
}

fn has_any_suffix(name: &str, suffixes: &[String]) -> bool {
    suffixes.iter().any(|s| name.ends_with(s.as_str()))
}

/// Classify an archive member by its file name.
pub fn classify_member(rules: &ProductRules, name: &str) -> MemberClass {
    if !rules.product_prefixes.iter().any(|p| name.starts_with(p.as_str())) {
        return MemberClass::Invalid;
    }
    if has_any_suffix(name, &rules.payload_suffixes) {
        MemberClass::Payload
    } else if has_any_suffix(name, &rules.header_suffixes) {
        MemberClass::Header
    } else {
        MemberClass::Invalid
    }
}

/// The member's file name, refusing absolute paths and `..`.
fn member_file_name(path: &Path) -> MirrorResult<String> {
    let mut name = None;
    for component in path.components() {
        match component {
            Component::Normal(part) => name = Some(part),
            Component::CurDir => {}
            _ => {
                return Err(MirrorError::Unpack(format!(
                    "archive member '{}' escapes the extraction directory",
                    path.display()
                )))
            }
        }
    }
    name.map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| MirrorError::Unpack("archive member with an empty name".to_string()))
}

fn open_archive(path: &Path, gzip: bool) -> MirrorResult<Archive<Box<dyn Read>>> {
    let file = File::open(path)
        .map_err(|e| MirrorError::Unpack(format!("opening {}: {}", path.display(), e)))?;
    let reader: Box<dyn Read> = if gzip {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(Archive::new(reader))
}

fn unpack_err(archive: &Path, e: std::io::Error) -> MirrorError {
    MirrorError::Unpack(format!("reading {}: {}", archive.display(), e))
}

/// Check every member name; return the member paths to extract.
fn plan(archive: &Path, gzip: bool, rules: &ProductRules) -> MirrorResult<HashSet<PathBuf>> {
    let mut tar = open_archive(archive, gzip)?;
    let mut payloads = HashSet::new();
    for entry in tar.entries().map_err(|e| unpack_err(archive, e))? {
        let entry = entry.map_err(|e| unpack_err(archive, e))?;
        if entry.header().entry_type().is_dir() {
            continue;
        }
        let path = entry.path().map_err(|e| unpack_err(archive, e))?.into_owned();
        let name = member_file_name(&path)?;
        match classify_member(rules, &name) {
            MemberClass::Payload => {
                payloads.insert(path);
            }
            MemberClass::Header => debug!(member = %name, "skipping header member"),
            MemberClass::Invalid => {
                return Err(MirrorError::Unpack(format!(
                    "member '{}' of {} is not a recognised product file",
                    path.display(),
                    archive.display()
                )))
            }
        }
    }
    if payloads.is_empty() {
        return Err(MirrorError::Unpack(format!(
            "{} holds no product payload",
            archive.display()
        )));
    }
    Ok(payloads)
}

/// Extract the product payloads of `archive` into `dest`.
///
/// Returns the final paths of the placed products. Invalid archives are
/// [`MirrorError::Unpack`]; failures to stage or rename into `dest` are
/// [`MirrorError::Convert`].
pub fn extract_products(
    archive: &Path,
    gzip: bool,
    dest: &Path,
    rules: &ProductRules,
) -> MirrorResult<Vec<PathBuf>> {
    let payloads = plan(archive, gzip, rules)?;

    fs::create_dir_all(dest)
        .map_err(|e| MirrorError::Convert(format!("creating {}: {}", dest.display(), e)))?;
    let staging = tempfile::Builder::new()
        .prefix(".tmpextr-")
        .tempdir_in(dest)
        .map_err(|e| MirrorError::Convert(format!("staging in {}: {}", dest.display(), e)))?;

    let mut staged = Vec::with_capacity(payloads.len());
    let mut tar = open_archive(archive, gzip)?;
    for entry in tar.entries().map_err(|e| unpack_err(archive, e))? {
        let mut entry = entry.map_err(|e| unpack_err(archive, e))?;
        let path = entry.path().map_err(|e| unpack_err(archive, e))?.into_owned();
        if !payloads.contains(&path) {
            continue;
        }
        let name = member_file_name(&path)?;
        if staged.contains(&name) {
            debug!(member = %path.display(), "duplicate product name, keeping the first");
            continue;
        }
        let target = staging.path().join(&name);
        entry.unpack(&target).map_err(|e| unpack_err(archive, e))?;
        staged.push(name);
    }

    let mut placed = Vec::with_capacity(staged.len());
    for name in staged {
        let final_path = dest.join(&name);
        fs::rename(staging.path().join(&name), &final_path).map_err(|e| {
            MirrorError::Convert(format!("placing {}: {}", final_path.display(), e))
        })?;
        placed.push(final_path);
    }
    Ok(placed)
}
