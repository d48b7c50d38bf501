use tracing::debug;

use crate::config::Config;
use crate::datamodel::container::{Compression, ContainerId, ContainerMeta};
use crate::datamodel::Transaction;
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::index;

/// Accumulates the new chunks of one upload into containers.
///
/// Each upload owns its packer; nothing is shared between uploads except the
/// container id counter of the backend.
#[derive(Debug)]
pub struct ContainerPacker {
    capacity: u64,
    compression: Compression,
    zstd_level: i32,
    buffer: Vec<u8>,
    /// Chunks in `buffer` awaiting a container, in arrival order.
    pending: Vec<(Fingerprint, u32)>,
    flushed: Vec<ContainerId>,
}

impl ContainerPacker {
    pub fn new(config: &Config) -> Self {
        Self {
            capacity: config.container_capacity,
            compression: config.compression,
            zstd_level: config.zstd_level,
            buffer: vec![],
            pending: vec![],
            flushed: vec![],
        }
    }

    /// Buffers a chunk, flushing the current container first if the chunk
    /// would overflow it.
    pub fn append<T: Transaction>(
        &mut self,
        tx: &mut T,
        fingerprint: Fingerprint,
        contents: &[u8],
    ) -> Result<()> {
        if self.buffer.len() as u64 + contents.len() as u64 > self.capacity {
            self.flush(tx)?;
        }
        self.buffer.extend_from_slice(contents);
        self.pending.push((fingerprint, contents.len() as u32));
        Ok(())
    }

    /// Writes the buffered chunks as a new container and places every
    /// pending chunk in it. Does nothing when the buffer is empty.
    pub fn flush<T: Transaction>(&mut self, tx: &mut T) -> Result<Option<ContainerId>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let id = tx.allocate_container_id()?;
        let len = self.buffer.len() as u64;
        let blob = match self.compression {
            Compression::None => std::mem::take(&mut self.buffer),
            Compression::Zstd => {
                let compressed = zstd::bulk::compress(&self.buffer, self.zstd_level)
                    .map_err(Error::Compression)?;
                self.buffer.clear();
                compressed
            }
        };
        let meta = ContainerMeta {
            len,
            stored_len: blob.len() as u64,
            compression: self.compression,
            resident_chunks: self.pending.len() as u32,
        };
        tx.put_container(id, &meta, blob)?;

        let mut offset = 0u64;
        for (fingerprint, size) in self.pending.drain(..) {
            index::finalize_placement(tx, &fingerprint, id, offset)?;
            offset += u64::from(size);
        }

        debug!(
            container = %id,
            len,
            stored_len = meta.stored_len,
            chunks = meta.resident_chunks,
            "flushed container"
        );
        self.flushed.push(id);
        Ok(Some(id))
    }

    /// Flushes whatever is left and returns all containers written.
    pub fn finish<T: Transaction>(mut self, tx: &mut T) -> Result<Vec<ContainerId>> {
        self.flush(tx)?;
        Ok(self.flushed)
    }
}
