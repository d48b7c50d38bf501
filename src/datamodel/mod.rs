//! Stored records and the persistence boundary.
//!
//! Everything the store knows lives in three record kinds: files, chunks and
//! containers. A [`Backend`] hands out consistent [`Snapshot`]s for readers
//! and all-or-nothing [`Transaction`]s for writers.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fingerprint::Fingerprint;

pub mod fjall_impl;
pub mod mem_impl;

pub use fjall_impl::FjallBackend;
pub use mem_impl::MemBackend;

pub mod file {
    use super::*;
    use crate::chunker::ChunkingStrategy;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    pub struct FileRecord {
        pub size: u64,
        pub chunking: ChunkingStrategy,
        /// Reconstruction order; the same fingerprint may appear repeatedly.
        pub chunks: Vec<Fingerprint>,
    }
}

pub mod chunk {
    use std::collections::BTreeSet;

    use super::*;

    /// Chunk metadata, in particular where it is stored
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    pub struct ChunkRecord {
        pub size: u32,
        /// Set once the chunk's container is flushed, never changed afterwards.
        pub placement: Option<Placement>,
        /// Paths of the files referencing this chunk. Never empty.
        pub files: BTreeSet<String>,
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
    pub struct Placement {
        pub container: container::ContainerId,
        pub offset: u64,
    }

    impl ChunkRecord {
        pub fn new(size: u32, file: &str) -> Self {
            Self {
                size,
                placement: None,
                files: BTreeSet::from([file.to_owned()]),
            }
        }
    }
}

pub mod container {
    use core::fmt;

    use super::*;

    #[derive(Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ContainerId(pub u64);

    impl ContainerId {
        pub fn to_key(self) -> [u8; 8] {
            self.0.to_be_bytes()
        }

        pub fn from_key(key: &[u8]) -> Option<Self> {
            key.try_into().ok().map(|bytes| Self(u64::from_be_bytes(bytes)))
        }
    }

    impl fmt::Display for ContainerId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl fmt::Debug for ContainerId {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "ContainerId({})", self.0)
        }
    }

    #[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
    #[repr(u8)]
    pub enum Compression {
        #[default]
        None = 0,
        Zstd = 1,
    }

    /// Bookkeeping for a container, stored apart from its immutable blob.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    pub struct ContainerMeta {
        /// Length of the packed chunk payloads.
        pub len: u64,
        /// Length of the blob as stored, after compression.
        pub stored_len: u64,
        pub compression: Compression,
        /// Number of chunk records placed in this container.
        pub resident_chunks: u32,
    }
}

use chunk::ChunkRecord;
use container::{ContainerId, ContainerMeta};
use file::FileRecord;

pub type RecordIter<'a, K, V> = Box<dyn Iterator<Item = Result<(K, V)>> + 'a>;

/// The persistence engine behind a store.
pub trait Backend: Send + Sync {
    type Snapshot: Snapshot;
    type Transaction<'a>: Transaction
    where
        Self: 'a;

    /// A read-only view of the last committed state.
    fn snapshot(&self) -> Result<Self::Snapshot>;

    /// Starts a write transaction. Dropping it without committing discards
    /// every change made through it.
    fn transaction(&self) -> Result<Self::Transaction<'_>>;
}

pub trait Snapshot {
    fn file(&self, path: &str) -> Result<Option<FileRecord>>;
    fn chunk(&self, fingerprint: &Fingerprint) -> Result<Option<ChunkRecord>>;
    fn container_meta(&self, id: ContainerId) -> Result<Option<ContainerMeta>>;
    /// The container blob as stored, possibly compressed.
    fn container_blob(&self, id: ContainerId) -> Result<Option<Vec<u8>>>;

    fn files(&self) -> RecordIter<'_, String, FileRecord>;
    fn chunks(&self) -> RecordIter<'_, Fingerprint, ChunkRecord>;
    fn containers(&self) -> RecordIter<'_, ContainerId, ContainerMeta>;

    fn chunks_in_container(&self, id: ContainerId) -> Result<Vec<(Fingerprint, ChunkRecord)>> {
        let mut resident = vec![];
        for entry in self.chunks() {
            let (fingerprint, chunk) = entry?;
            if chunk.placement.is_some_and(|placement| placement.container == id) {
                resident.push((fingerprint, chunk));
            }
        }
        Ok(resident)
    }
}

pub trait Transaction {
    fn file(&mut self, path: &str) -> Result<Option<FileRecord>>;
    fn put_file(&mut self, path: &str, file: &FileRecord) -> Result<()>;
    fn remove_file(&mut self, path: &str) -> Result<()>;

    fn chunk(&mut self, fingerprint: &Fingerprint) -> Result<Option<ChunkRecord>>;
    fn put_chunk(&mut self, fingerprint: &Fingerprint, chunk: &ChunkRecord) -> Result<()>;
    fn remove_chunk(&mut self, fingerprint: &Fingerprint) -> Result<()>;

    fn container_meta(&mut self, id: ContainerId) -> Result<Option<ContainerMeta>>;
    fn put_container_meta(&mut self, id: ContainerId, meta: &ContainerMeta) -> Result<()>;
    /// Writes a new container. Blobs are never rewritten.
    fn put_container(&mut self, id: ContainerId, meta: &ContainerMeta, blob: Vec<u8>) -> Result<()>;
    fn remove_container(&mut self, id: ContainerId) -> Result<()>;

    /// Hands out the next container id. Ids are never reused.
    fn allocate_container_id(&mut self) -> Result<ContainerId>;

    fn commit(self) -> Result<()>;
}

mod dbg {
    use super::*;
    use core::fmt;

    impl fmt::Display for file::FileRecord {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(
                f,
                "{} bytes in {} chunks ({:?})",
                self.size,
                self.chunks.len(),
                self.chunking
            )
        }
    }
}
