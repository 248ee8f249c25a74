//! State Differencer.
//!
//! [`diff`] is plain set difference between the new inventory and the
//! snapshot. [`newer_than`] is the timestamp variant used for ancillary
//! files, where the baseline is the newest file already on local disk.

use crate::types::RemoteEntry;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// In the new inventory, not in the snapshot.
    pub to_download: BTreeSet<String>,
    /// In the snapshot, gone from the remote. Reported only; nothing local
    /// is ever deleted on its account.
    pub to_remove: BTreeSet<String>,
}

pub fn diff(new: &BTreeSet<String>, snapshot: &BTreeSet<String>) -> Diff {
    Diff {
        to_download: new.difference(snapshot).cloned().collect(),
        to_remove: snapshot.difference(new).cloned().collect(),
    }
}

/// Paths of `entries` to fetch given the newest local modification time.
///
/// With no local baseline everything is fetched. Otherwise only entries
/// strictly newer than `newest_local`; entries without a parseable listing
/// time are skipped.
pub fn newer_than<'a>(
    entries: impl IntoIterator<Item = &'a RemoteEntry>,
    newest_local: Option<DateTime<Utc>>,
) -> Vec<String> {
    let Some(baseline) = newest_local else {
        return entries.into_iter().map(|e| e.path.clone()).collect();
    };
    entries
        .into_iter()
        .filter(|e| match e.modified {
            Some(modified) => modified > baseline,
            None => {
                warn!(path = %e.path, "no listing time; not comparable with local files");
                false
            }
        })
        .map(|e| e.path.clone())
        .collect()
}
