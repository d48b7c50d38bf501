//! The chunk index: fingerprint to chunk record, with reference tracking.
//!
//! All operations run inside a backend transaction, so a check-and-insert is
//! atomic with respect to every other writer.

use crate::datamodel::chunk::{ChunkRecord, Placement};
use crate::datamodel::container::ContainerId;
use crate::datamodel::Transaction;
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// First sighting; the caller has to hand the bytes to the packer.
    New,
    /// Already stored; the caller drops its copy of the bytes.
    Existing,
}

impl Lookup {
    pub fn is_new(self) -> bool {
        self == Self::New
    }
}

/// Outcome of releasing one file's reference to a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// Other files still reference the chunk.
    Retained,
    /// That was the last reference; the record is gone.
    Deleted { placement: Option<Placement>, size: u32 },
}

pub fn lookup_or_insert<T: Transaction>(
    tx: &mut T,
    fingerprint: &Fingerprint,
    size: u32,
    file: &str,
) -> Result<Lookup> {
    match tx.chunk(fingerprint)? {
        Some(mut chunk) => {
            if chunk.files.insert(file.to_owned()) {
                tx.put_chunk(fingerprint, &chunk)?;
            }
            Ok(Lookup::Existing)
        }
        None => {
            tx.put_chunk(fingerprint, &ChunkRecord::new(size, file))?;
            Ok(Lookup::New)
        }
    }
}

/// Drops `file` from the chunk's reference set, deleting the chunk when no
/// reference remains.
pub fn remove_reference<T: Transaction>(
    tx: &mut T,
    fingerprint: &Fingerprint,
    file: &str,
) -> Result<Released> {
    let Some(mut chunk) = tx.chunk(fingerprint)? else {
        return Err(Error::ChunkNotFound(*fingerprint));
    };

    chunk.files.remove(file);
    if chunk.files.is_empty() {
        tx.remove_chunk(fingerprint)?;
        return Ok(Released::Deleted {
            placement: chunk.placement,
            size: chunk.size,
        });
    }

    tx.put_chunk(fingerprint, &chunk)?;
    Ok(Released::Retained)
}

/// Records where a new chunk was packed.
pub fn finalize_placement<T: Transaction>(
    tx: &mut T,
    fingerprint: &Fingerprint,
    container: ContainerId,
    offset: u64,
) -> Result<()> {
    let Some(mut chunk) = tx.chunk(fingerprint)? else {
        return Err(Error::NotFound(*fingerprint));
    };
    chunk.placement = Some(Placement { container, offset });
    tx.put_chunk(fingerprint, &chunk)
}
