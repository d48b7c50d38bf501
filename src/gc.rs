//! Releases a deleted file's chunks and drops containers nothing lives in.
//!
//! A container is live while at least one chunk record points into it. When
//! its last resident chunk is deleted it becomes orphaned, and the sweep at
//! the end of the same collection removes it, so no orphan outlives the
//! delete that created it.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, warn};

use crate::datamodel::container::ContainerId;
use crate::datamodel::file::FileRecord;
use crate::datamodel::Transaction;
use crate::error::{Error, Result};
use crate::index::{self, Released};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GcReport {
    pub released_chunks: usize,
    pub deleted_chunks: usize,
    pub deleted_bytes: u64,
    pub removed_containers: Vec<ContainerId>,
}

/// Drops `path`'s reference from every chunk of `file`.
pub fn collect<T: Transaction>(tx: &mut T, path: &str, file: &FileRecord) -> Result<GcReport> {
    let mut report = GcReport::default();
    let mut touched = BTreeSet::new();
    let mut seen = HashSet::new();

    for fingerprint in &file.chunks {
        if !seen.insert(fingerprint) {
            continue;
        }
        report.released_chunks += 1;

        let released = index::remove_reference(tx, fingerprint, path)?;
        if let Released::Deleted { placement, size } = released {
            report.deleted_chunks += 1;
            report.deleted_bytes += u64::from(size);

            if let Some(placement) = placement {
                release_resident(tx, placement.container)?;
                touched.insert(placement.container);
            }
        }
    }

    for id in touched {
        if sweep(tx, id)? {
            report.removed_containers.push(id);
        }
    }
    Ok(report)
}

fn release_resident<T: Transaction>(tx: &mut T, id: ContainerId) -> Result<()> {
    let Some(mut meta) = tx.container_meta(id)? else {
        warn!(container = %id, "deleted chunk was placed in a missing container");
        return Err(Error::ContainerNotFound(id));
    };
    let Some(remaining) = meta.resident_chunks.checked_sub(1) else {
        warn!(container = %id, "container resident count is already zero");
        return Err(Error::ResidentCountUnderflow(id));
    };
    meta.resident_chunks = remaining;
    tx.put_container_meta(id, &meta)
}

/// Removes the container if it is orphaned. Returns whether it was removed.
fn sweep<T: Transaction>(tx: &mut T, id: ContainerId) -> Result<bool> {
    match tx.container_meta(id)? {
        Some(meta) if meta.resident_chunks == 0 => {
            tx.remove_container(id)?;
            debug!(container = %id, bytes = meta.stored_len, "removed orphaned container");
            Ok(true)
        }
        _ => Ok(false),
    }
}
