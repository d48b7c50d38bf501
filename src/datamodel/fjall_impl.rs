use std::path::Path;

use fjall::{
    PersistMode, ReadTransaction, TransactionalKeyspace, TransactionalPartitionHandle,
    WriteTransaction,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::TempDir;

use super::*;
use crate::error::Error;

const NEXT_CONTAINER_ID: &[u8] = b"next_container_id";

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(postcard::to_stdvec(value)?)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(postcard::from_bytes(bytes)?)
}

fn decode_path(key: &[u8]) -> Result<String> {
    String::from_utf8(key.to_vec())
        .map_err(|_| Error::Backend("file key is not valid UTF-8".into()))
}

fn decode_fingerprint(key: &[u8]) -> Result<Fingerprint> {
    Fingerprint::from_slice(key)
        .ok_or_else(|| Error::Backend(format!("malformed chunk key of {} bytes", key.len())))
}

fn decode_container_id(key: &[u8]) -> Result<ContainerId> {
    ContainerId::from_key(key)
        .ok_or_else(|| Error::Backend(format!("malformed container key of {} bytes", key.len())))
}

#[derive(Clone)]
struct Partitions {
    files: TransactionalPartitionHandle,
    chunks: TransactionalPartitionHandle,
    containers: TransactionalPartitionHandle,
    container_meta: TransactionalPartitionHandle,
    meta: TransactionalPartitionHandle,
}

/// Persists the store in a transactional `fjall` keyspace.
pub struct FjallBackend {
    _tempdir: Option<TempDir>,
    database: TransactionalKeyspace,
    partitions: Partitions,
    sync_commits: bool,
}

impl FjallBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let database = fjall::Config::new(path).open_transactional()?;
        Self::with_keyspace(database, None)
    }

    /// Opens a keyspace in a fresh temporary directory, removed on drop.
    pub fn temporary() -> Result<Self> {
        let tempdir = tempfile::tempdir()
            .map_err(|err| Error::Backend(format!("failed to create tempdir: {err}")))?;
        let database = fjall::Config::new(&tempdir).open_transactional()?;
        Self::with_keyspace(database, Some(tempdir))
    }

    fn with_keyspace(database: TransactionalKeyspace, tempdir: Option<TempDir>) -> Result<Self> {
        let partitions = Partitions {
            files: database.open_partition("files", Default::default())?,
            chunks: database.open_partition("chunks", Default::default())?,
            containers: database.open_partition("containers", Default::default())?,
            container_meta: database.open_partition("container_meta", Default::default())?,
            meta: database.open_partition("meta", Default::default())?,
        };

        Ok(Self {
            _tempdir: tempdir,
            database,
            partitions,
            sync_commits: false,
        })
    }

    /// Fsync the journal after every commit.
    pub fn with_sync_commits(mut self, sync_commits: bool) -> Self {
        self.sync_commits = sync_commits;
        self
    }
}

impl Backend for FjallBackend {
    type Snapshot = FjallSnapshot;
    type Transaction<'a> = FjallTransaction<'a>;

    fn snapshot(&self) -> Result<FjallSnapshot> {
        Ok(FjallSnapshot {
            read_tx: self.database.read_tx(),
            partitions: self.partitions.clone(),
        })
    }

    fn transaction(&self) -> Result<FjallTransaction<'_>> {
        Ok(FjallTransaction {
            write_tx: self.database.write_tx()?,
            backend: self,
        })
    }
}

pub struct FjallSnapshot {
    read_tx: ReadTransaction,
    partitions: Partitions,
}

impl Snapshot for FjallSnapshot {
    fn file(&self, path: &str) -> Result<Option<FileRecord>> {
        let value = self.read_tx.get(&self.partitions.files, path)?;
        value.map(|value| decode(&value)).transpose()
    }

    fn chunk(&self, fingerprint: &Fingerprint) -> Result<Option<ChunkRecord>> {
        let value = self
            .read_tx
            .get(&self.partitions.chunks, fingerprint.as_bytes())?;
        value.map(|value| decode(&value)).transpose()
    }

    fn container_meta(&self, id: ContainerId) -> Result<Option<ContainerMeta>> {
        let value = self
            .read_tx
            .get(&self.partitions.container_meta, id.to_key())?;
        value.map(|value| decode(&value)).transpose()
    }

    fn container_blob(&self, id: ContainerId) -> Result<Option<Vec<u8>>> {
        let value = self.read_tx.get(&self.partitions.containers, id.to_key())?;
        Ok(value.map(|value| value.to_vec()))
    }

    fn files(&self) -> RecordIter<'_, String, FileRecord> {
        Box::new(self.read_tx.iter(&self.partitions.files).map(|entry| {
            let (key, value) = entry?;
            Ok((decode_path(&key)?, decode(&value)?))
        }))
    }

    fn chunks(&self) -> RecordIter<'_, Fingerprint, ChunkRecord> {
        Box::new(self.read_tx.iter(&self.partitions.chunks).map(|entry| {
            let (key, value) = entry?;
            Ok((decode_fingerprint(&key)?, decode(&value)?))
        }))
    }

    fn containers(&self) -> RecordIter<'_, ContainerId, ContainerMeta> {
        Box::new(self.read_tx.iter(&self.partitions.container_meta).map(|entry| {
            let (key, value) = entry?;
            Ok((decode_container_id(&key)?, decode(&value)?))
        }))
    }
}

pub struct FjallTransaction<'a> {
    write_tx: WriteTransaction,
    backend: &'a FjallBackend,
}

impl Transaction for FjallTransaction<'_> {
    fn file(&mut self, path: &str) -> Result<Option<FileRecord>> {
        let partition = &self.backend.partitions.files;
        let value = self.write_tx.get(partition, path)?;
        value.map(|value| decode(&value)).transpose()
    }

    fn put_file(&mut self, path: &str, file: &FileRecord) -> Result<()> {
        let value = encode(file)?;
        let partition = &self.backend.partitions.files;
        self.write_tx.insert(partition, path.as_bytes(), value);
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> Result<()> {
        let partition = &self.backend.partitions.files;
        self.write_tx.remove(partition, path.as_bytes());
        Ok(())
    }

    fn chunk(&mut self, fingerprint: &Fingerprint) -> Result<Option<ChunkRecord>> {
        let partition = &self.backend.partitions.chunks;
        let value = self.write_tx.get(partition, fingerprint.as_bytes())?;
        value.map(|value| decode(&value)).transpose()
    }

    fn put_chunk(&mut self, fingerprint: &Fingerprint, chunk: &ChunkRecord) -> Result<()> {
        let value = encode(chunk)?;
        let partition = &self.backend.partitions.chunks;
        self.write_tx
            .insert(partition, &fingerprint.as_bytes()[..], value);
        Ok(())
    }

    fn remove_chunk(&mut self, fingerprint: &Fingerprint) -> Result<()> {
        let partition = &self.backend.partitions.chunks;
        self.write_tx.remove(partition, &fingerprint.as_bytes()[..]);
        Ok(())
    }

    fn container_meta(&mut self, id: ContainerId) -> Result<Option<ContainerMeta>> {
        let partition = &self.backend.partitions.container_meta;
        let value = self.write_tx.get(partition, id.to_key())?;
        value.map(|value| decode(&value)).transpose()
    }

    fn put_container_meta(&mut self, id: ContainerId, meta: &ContainerMeta) -> Result<()> {
        let value = encode(meta)?;
        let partition = &self.backend.partitions.container_meta;
        self.write_tx.insert(partition, &id.to_key()[..], value);
        Ok(())
    }

    fn put_container(&mut self, id: ContainerId, meta: &ContainerMeta, blob: Vec<u8>) -> Result<()> {
        let partitions = &self.backend.partitions;
        self.write_tx
            .insert(&partitions.containers, &id.to_key()[..], blob);
        self.put_container_meta(id, meta)
    }

    fn remove_container(&mut self, id: ContainerId) -> Result<()> {
        let partitions = &self.backend.partitions;
        self.write_tx.remove(&partitions.containers, &id.to_key()[..]);
        self.write_tx
            .remove(&partitions.container_meta, &id.to_key()[..]);
        Ok(())
    }

    fn allocate_container_id(&mut self) -> Result<ContainerId> {
        let partition = &self.backend.partitions.meta;
        let next = match self.write_tx.get(partition, NEXT_CONTAINER_ID)? {
            Some(value) => decode_container_id(&value)?,
            None => ContainerId(0),
        };
        let following = ContainerId(next.0 + 1);
        self.write_tx
            .insert(partition, NEXT_CONTAINER_ID, &following.to_key()[..]);
        Ok(next)
    }

    fn commit(self) -> Result<()> {
        if self.write_tx.commit()?.is_err() {
            return Err(Error::Conflict);
        }
        if self.backend.sync_commits {
            self.backend.database.persist(PersistMode::SyncAll)?;
        }
        Ok(())
    }
}
