//! Listing Retriever. Walks remote trees over one session.
//!
//! The walk keeps an explicit queue of directories still to visit, lists
//! each one exactly once and never fans out: every command goes over the
//! session it was handed, in order.

use crate::error::MirrorError;
use crate::remote::RemoteSession;
use crate::types::{EntryKind, Inventory, RemoteEntry};
use mirror_ftp::{FtpEntry, FtpEntryKind};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, warn};

/// Strip trailing slashes; `/` (and the empty string) stay `/`.
pub fn normalize_root(root: &str) -> String {
    let trimmed = root.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Join a directory and an entry name without doubling the separator at `/`.
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() || dir == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

fn to_remote_entry(dir: &str, entry: &FtpEntry) -> Option<RemoteEntry> {
    let kind = match entry.kind {
        FtpEntryKind::Directory => EntryKind::Dir,
        FtpEntryKind::File | FtpEntryKind::Symlink => EntryKind::File,
        FtpEntryKind::Unknown => return None,
    };
    if entry.name.contains('/') {
        return None;
    }
    Some(RemoteEntry {
        path: join_remote(dir, &entry.name),
        kind,
        size: entry.size,
        modified: entry.modified,
    })
}

/// Recursively list every file below `root`, then keep only paths
/// containing one of `filter` (when non-empty).
///
/// A directory that cannot be listed is logged and recorded in
/// `Inventory::failed_dirs`; the walk carries on with the rest.
pub async fn list_tree(session: &mut dyn RemoteSession, root: &str, filter: &[String]) -> Inventory {
    let root = normalize_root(root);
    let mut inventory = Inventory::new(root.clone());
    let mut pending: VecDeque<String> = VecDeque::from([root.clone()]);
    let mut visited: HashSet<String> = HashSet::from([root.clone()]);

    while let Some(dir) = pending.pop_front() {
        let listing = match session.list_dir(&dir).await {
            Ok(listing) => listing,
            Err(e) => {
                let err = MirrorError::Listing(format!("{}: {}", dir, e));
                warn!(dir = %dir, error = %err, "skipping branch");
                inventory.failed_dirs.push(dir);
                continue;
            }
        };
        debug!(dir = %dir, entries = listing.len(), "listed");

        for entry in listing.iter().filter_map(|e| to_remote_entry(&dir, e)) {
            match entry.kind {
                EntryKind::Dir => {
                    if visited.insert(entry.path.clone()) {
                        pending.push_back(entry.path);
                    }
                }
                EntryKind::File => {
                    inventory.insert(entry);
                }
            }
        }
    }

    let found = inventory.len();
    inventory.retain_matching(filter);
    info!(
        root = %root,
        directories = visited.len(),
        files = found,
        kept = inventory.len(),
        failed_dirs = inventory.failed_dirs.len(),
        "remote listing complete"
    );
    inventory
}

/// List each of `dirs` without descending. Subdirectories are ignored.
pub async fn list_flat(session: &mut dyn RemoteSession, dirs: &[String]) -> Inventory {
    let mut inventory = Inventory::new(dirs.join(","));
    for dir in dirs.iter().map(|d| normalize_root(d)) {
        match session.list_dir(&dir).await {
            Ok(listing) => {
                for entry in listing.iter().filter_map(|e| to_remote_entry(&dir, e)) {
                    if entry.kind == EntryKind::File {
                        inventory.insert(entry);
                    }
                }
            }
            Err(e) => {
                let err = MirrorError::Listing(format!("{}: {}", dir, e));
                warn!(dir = %dir, error = %err, "skipping directory");
                inventory.failed_dirs.push(dir);
            }
        }
    }
    inventory
}
