use tracing::warn;

use crate::datamodel::container::{Compression, ContainerId, ContainerMeta};
use crate::datamodel::file::FileRecord;
use crate::datamodel::Snapshot;
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

/// A container blob decoded back into its packed chunk payloads.
struct OpenContainer {
    id: ContainerId,
    payload: Vec<u8>,
}

fn open_container<S: Snapshot>(snapshot: &S, id: ContainerId) -> Result<OpenContainer> {
    let (Some(meta), Some(blob)) = (snapshot.container_meta(id)?, snapshot.container_blob(id)?)
    else {
        return Err(Error::ContainerNotFound(id));
    };
    let payload = decode_blob(&meta, blob)?;
    Ok(OpenContainer { id, payload })
}

pub(crate) fn decode_blob(meta: &ContainerMeta, blob: Vec<u8>) -> Result<Vec<u8>> {
    match meta.compression {
        Compression::None => Ok(blob),
        Compression::Zstd => {
            zstd::bulk::decompress(&blob, meta.len as usize).map_err(Error::Compression)
        }
    }
}

/// Rebuilds a file by copying its chunks out of their containers in order.
///
/// Every inconsistency between the file, its chunks and their containers is
/// reported as an error instead of being skipped.
pub fn assemble<S: Snapshot>(
    snapshot: &S,
    path: &str,
    file: &FileRecord,
    verify: bool,
) -> Result<Vec<u8>> {
    let mut contents = Vec::with_capacity(file.size as usize);
    let mut current: Option<OpenContainer> = None;

    for fingerprint in &file.chunks {
        let bytes = read_chunk(snapshot, fingerprint, &mut current)?;
        if verify && Fingerprint::of(bytes) != *fingerprint {
            warn!(path, %fingerprint, "chunk content does not match its fingerprint");
            return Err(Error::FingerprintMismatch(*fingerprint));
        }
        contents.extend_from_slice(bytes);
    }

    if contents.len() as u64 != file.size {
        return Err(Error::SizeMismatch {
            path: path.to_owned(),
            expected: file.size,
            actual: contents.len() as u64,
        });
    }
    Ok(contents)
}

/// Resolves one chunk, reusing the open container when consecutive chunks
/// share it.
fn read_chunk<'c, S: Snapshot>(
    snapshot: &S,
    fingerprint: &Fingerprint,
    current: &'c mut Option<OpenContainer>,
) -> Result<&'c [u8]> {
    let Some(chunk) = snapshot.chunk(fingerprint)? else {
        warn!(%fingerprint, "file references a missing chunk");
        return Err(Error::ChunkNotFound(*fingerprint));
    };
    let Some(placement) = chunk.placement else {
        return Err(Error::ChunkNotPlaced(*fingerprint));
    };

    if current.as_ref().map(|open| open.id) != Some(placement.container) {
        match open_container(snapshot, placement.container) {
            Ok(open) => *current = Some(open),
            Err(err) => {
                warn!(%fingerprint, container = %placement.container, "chunk container is unreadable");
                return Err(err);
            }
        }
    }
    let container = current
        .as_ref()
        .ok_or(Error::ContainerNotFound(placement.container))?;

    let start = placement.offset as usize;
    let end = start + chunk.size as usize;
    container
        .payload
        .get(start..end)
        .ok_or(Error::ChunkOutOfBounds {
            fingerprint: *fingerprint,
            container: placement.container,
        })
}
