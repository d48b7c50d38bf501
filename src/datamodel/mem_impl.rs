use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::*;
use crate::error::Error;

#[derive(Debug, Default, Clone)]
struct State {
    files: BTreeMap<String, FileRecord>,
    chunks: BTreeMap<Fingerprint, ChunkRecord>,
    containers: BTreeMap<ContainerId, (ContainerMeta, Arc<[u8]>)>,
    next_container_id: u64,
}

/// Keeps the whole store in memory.
///
/// Every transaction works on a private copy of the state which replaces the
/// shared state on commit. Container blobs are shared between copies.
#[derive(Debug, Default)]
pub struct MemBackend {
    state: RwLock<Arc<State>>,
    fail_next_commit: AtomicBool,
}

impl MemBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next commit fail with a storage error, leaving the state
    /// untouched.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

impl Backend for MemBackend {
    type Snapshot = MemSnapshot;
    type Transaction<'a> = MemTransaction<'a>;

    fn snapshot(&self) -> Result<MemSnapshot> {
        Ok(MemSnapshot(Arc::clone(&self.state.read())))
    }

    fn transaction(&self) -> Result<MemTransaction<'_>> {
        let base = Arc::clone(&self.state.read());
        let state = State::clone(&base);
        Ok(MemTransaction {
            backend: self,
            base,
            state,
        })
    }
}

pub struct MemSnapshot(Arc<State>);

impl Snapshot for MemSnapshot {
    fn file(&self, path: &str) -> Result<Option<FileRecord>> {
        Ok(self.0.files.get(path).cloned())
    }

    fn chunk(&self, fingerprint: &Fingerprint) -> Result<Option<ChunkRecord>> {
        Ok(self.0.chunks.get(fingerprint).cloned())
    }

    fn container_meta(&self, id: ContainerId) -> Result<Option<ContainerMeta>> {
        Ok(self.0.containers.get(&id).map(|(meta, _)| meta.clone()))
    }

    fn container_blob(&self, id: ContainerId) -> Result<Option<Vec<u8>>> {
        Ok(self.0.containers.get(&id).map(|(_, blob)| blob.to_vec()))
    }

    fn files(&self) -> RecordIter<'_, String, FileRecord> {
        Box::new(
            self.0
                .files
                .iter()
                .map(|(path, file)| Ok((path.clone(), file.clone()))),
        )
    }

    fn chunks(&self) -> RecordIter<'_, Fingerprint, ChunkRecord> {
        Box::new(
            self.0
                .chunks
                .iter()
                .map(|(fingerprint, chunk)| Ok((*fingerprint, chunk.clone()))),
        )
    }

    fn containers(&self) -> RecordIter<'_, ContainerId, ContainerMeta> {
        Box::new(
            self.0
                .containers
                .iter()
                .map(|(id, (meta, _))| Ok((*id, meta.clone()))),
        )
    }
}

pub struct MemTransaction<'a> {
    backend: &'a MemBackend,
    /// The committed state this transaction started from.
    base: Arc<State>,
    state: State,
}

impl Transaction for MemTransaction<'_> {
    fn file(&mut self, path: &str) -> Result<Option<FileRecord>> {
        Ok(self.state.files.get(path).cloned())
    }

    fn put_file(&mut self, path: &str, file: &FileRecord) -> Result<()> {
        self.state.files.insert(path.to_owned(), file.clone());
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> Result<()> {
        self.state.files.remove(path);
        Ok(())
    }

    fn chunk(&mut self, fingerprint: &Fingerprint) -> Result<Option<ChunkRecord>> {
        Ok(self.state.chunks.get(fingerprint).cloned())
    }

    fn put_chunk(&mut self, fingerprint: &Fingerprint, chunk: &ChunkRecord) -> Result<()> {
        self.state.chunks.insert(*fingerprint, chunk.clone());
        Ok(())
    }

    fn remove_chunk(&mut self, fingerprint: &Fingerprint) -> Result<()> {
        self.state.chunks.remove(fingerprint);
        Ok(())
    }

    fn container_meta(&mut self, id: ContainerId) -> Result<Option<ContainerMeta>> {
        Ok(self.state.containers.get(&id).map(|(meta, _)| meta.clone()))
    }

    fn put_container_meta(&mut self, id: ContainerId, meta: &ContainerMeta) -> Result<()> {
        match self.state.containers.get_mut(&id) {
            Some((existing, _)) => {
                *existing = meta.clone();
                Ok(())
            }
            None => Err(Error::Backend(format!(
                "container {id} has no blob to attach metadata to"
            ))),
        }
    }

    fn put_container(&mut self, id: ContainerId, meta: &ContainerMeta, blob: Vec<u8>) -> Result<()> {
        self.state
            .containers
            .insert(id, (meta.clone(), Arc::from(blob)));
        Ok(())
    }

    fn remove_container(&mut self, id: ContainerId) -> Result<()> {
        self.state.containers.remove(&id);
        Ok(())
    }

    fn allocate_container_id(&mut self) -> Result<ContainerId> {
        let id = ContainerId(self.state.next_container_id);
        self.state.next_container_id += 1;
        Ok(id)
    }

    fn commit(self) -> Result<()> {
        let mut committed = self.backend.state.write();
        if self.backend.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(Error::Backend("injected commit failure".into()));
        }
        if !Arc::ptr_eq(&committed, &self.base) {
            return Err(Error::Conflict);
        }
        *committed = Arc::new(self.state);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_record(size: u64) -> FileRecord {
        FileRecord {
            size,
            chunking: Default::default(),
            chunks: vec![],
        }
    }

    #[test]
    fn snapshots_do_not_see_later_commits() {
        let backend = MemBackend::new();
        let snapshot = backend.snapshot().unwrap();

        let mut tx = backend.transaction().unwrap();
        tx.put_file("a.txt", &file_record(1)).unwrap();
        tx.commit().unwrap();

        assert!(snapshot.file("a.txt").unwrap().is_none());
        assert_eq!(backend.snapshot().unwrap().file("a.txt").unwrap(), Some(file_record(1)));
    }

    #[test]
    fn concurrent_commits_conflict() {
        let backend = MemBackend::new();

        let mut first = backend.transaction().unwrap();
        let mut second = backend.transaction().unwrap();
        first.put_file("a.txt", &file_record(1)).unwrap();
        second.put_file("b.txt", &file_record(2)).unwrap();

        first.commit().unwrap();
        assert!(matches!(second.commit(), Err(Error::Conflict)));

        let snapshot = backend.snapshot().unwrap();
        assert_eq!(snapshot.files().count(), 1);
    }

    #[test]
    fn injected_failures_roll_back() {
        let backend = MemBackend::new();
        backend.fail_next_commit();

        let mut tx = backend.transaction().unwrap();
        tx.put_file("a.txt", &file_record(1)).unwrap();
        assert!(tx.commit().unwrap_err().is_storage_failure());
        assert!(backend.snapshot().unwrap().file("a.txt").unwrap().is_none());

        // only the next commit fails
        let mut tx = backend.transaction().unwrap();
        tx.put_file("a.txt", &file_record(1)).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn metadata_needs_a_container() {
        let backend = MemBackend::new();
        let mut tx = backend.transaction().unwrap();
        let meta = ContainerMeta {
            len: 0,
            stored_len: 0,
            compression: Default::default(),
            resident_chunks: 0,
        };
        assert!(tx.put_container_meta(ContainerId(0), &meta).is_err());
    }
}
