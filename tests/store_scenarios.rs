use std::sync::Arc;

use cdcstore::datamodel::container::ContainerId;
use cdcstore::datamodel::{Backend, Snapshot};
use cdcstore::{ChunkSizes, Config, DedupStore, Error, FjallBackend, MemBackend};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

const MIB: usize = 1024 * 1024;
const DEFAULT_SIZES: ChunkSizes = ChunkSizes::new(4096, 65536, 262144);

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut data = vec![0; len];
    StdRng::seed_from_u64(seed).fill_bytes(&mut data);
    data
}

#[test]
fn identical_zero_files_share_one_chunk() {
    let store = DedupStore::new(FjallBackend::temporary().unwrap());
    let zeros = vec![0u8; 2 * MIB];

    store.upload_file("a.txt", DEFAULT_SIZES, &zeros).unwrap();
    let stats = store.statistics().unwrap();
    // an all-zero window hashes to zero, so every cut lands at the minimum
    assert_eq!(stats.total_files, 1);
    assert_eq!(stats.total_chunks, 512);
    assert_eq!(stats.unique_chunks, 1);
    assert_eq!(stats.unique_bytes, 4096);
    assert_eq!(stats.total_containers, 1);
    assert_eq!(stats.deduplication_ratio, 512.0);

    store.upload_file("b.txt", DEFAULT_SIZES, &zeros).unwrap();
    let stats = store.statistics().unwrap();
    assert_eq!(stats.total_files, 2);
    assert_eq!(stats.total_chunks, 1024);
    assert_eq!(stats.unique_chunks, 1);
    assert_eq!(stats.total_bytes, 4 * MIB as u64);
    assert_eq!(stats.deduplication_ratio, 1024.0);

    store.delete_file("a.txt").unwrap();
    assert_eq!(store.download_file("b.txt").unwrap(), zeros);
    assert_eq!(store.statistics().unwrap().unique_chunks, 1);

    store.delete_file("b.txt").unwrap();
    let stats = store.statistics().unwrap();
    assert_eq!(stats.total_files, 0);
    assert_eq!(stats.unique_chunks, 0);
    assert_eq!(stats.total_containers, 0);
    assert_eq!(stats.deduplication_ratio, 0.0);
    assert!(store.check().unwrap().is_consistent());
}

#[test]
fn edited_copies_only_store_the_changed_region() {
    let store = DedupStore::new(FjallBackend::temporary().unwrap());
    let sizes = ChunkSizes::new(2048, 8192, 65536);
    let original = random_bytes(1, 4 * MIB);

    let mut edited = original.clone();
    let splice = random_bytes(2, 100);
    edited.splice(MIB..MIB, splice);

    let first = store.upload_file("original", sizes, &original).unwrap();
    let second = store.upload_file("edited", sizes, &edited).unwrap();
    assert_eq!(first.new_bytes, original.len() as u64);
    // boundaries resynchronize shortly after the insertion
    assert!(second.new_bytes < 256 * 1024, "{second:?}");

    assert_eq!(store.download_file("original").unwrap(), original);
    assert_eq!(store.download_file("edited").unwrap(), edited);
    assert!(store.statistics().unwrap().deduplication_ratio > 1.8);
}

#[test]
fn files_survive_reopening_the_keyspace() {
    let dir = tempfile::tempdir().unwrap();
    let contents = random_bytes(3, 300_000);
    let sizes = ChunkSizes::new(1024, 4096, 16384);
    let config = Config {
        container_capacity: 64 * 1024,
        compression: cdcstore::datamodel::container::Compression::Zstd,
        sync_commits: true,
        ..Default::default()
    };

    {
        let backend = FjallBackend::open(dir.path())
            .unwrap()
            .with_sync_commits(true);
        let store = DedupStore::with_config(backend, config.clone()).unwrap();
        store.upload_file("keep", sizes, &contents).unwrap();
        store.upload_file("drop", sizes, b"short lived").unwrap();
        store.delete_file("drop").unwrap();
    }

    let backend = FjallBackend::open(dir.path()).unwrap();
    let store = DedupStore::with_config(backend, config).unwrap();
    assert!(store.contains("keep").unwrap());
    assert!(!store.contains("drop").unwrap());
    assert_eq!(store.download_file("keep").unwrap(), contents);

    let before: Vec<ContainerId> = container_ids(store.backend());
    store.upload_file("later", sizes, b"fresh container").unwrap();
    let after = container_ids(store.backend());
    let new_id = after.iter().find(|id| !before.contains(id)).unwrap();
    // ids handed out before the restart are never reused
    assert!(before.iter().all(|id| id < new_id));
    assert!(new_id.0 > before.len() as u64);
}

fn container_ids(backend: &impl Backend) -> Vec<ContainerId> {
    backend
        .snapshot()
        .unwrap()
        .containers()
        .map(|entry| entry.unwrap().0)
        .collect()
}

#[test]
fn concurrent_writers_and_readers() {
    let store = Arc::new(DedupStore::new(MemBackend::new()));
    let sizes = ChunkSizes::new(256, 1024, 8192);
    let shared = random_bytes(4, 200_000);
    store.upload_file("base", sizes, &shared).unwrap();

    std::thread::scope(|scope| {
        for i in 0..4u64 {
            let store = &store;
            let shared = &shared;
            scope.spawn(move || {
                let mut contents = shared.clone();
                contents.extend(random_bytes(10 + i, 20_000));
                let path = format!("writer-{i}");
                store.upload_file(&path, sizes, &contents).unwrap();
                assert_eq!(store.download_file(&path).unwrap(), contents);
                store.delete_file(&path).unwrap();
            });
        }
        for _ in 0..4 {
            let store = &store;
            let shared = &shared;
            scope.spawn(move || {
                for _ in 0..10 {
                    assert_eq!(&store.download_file("base").unwrap(), shared);
                    let stats = store.statistics().unwrap();
                    assert!(stats.total_files >= 1);
                }
            });
        }
    });

    let stats = store.statistics().unwrap();
    assert_eq!(stats.total_files, 1);
    assert_eq!(stats.unique_bytes, 200_000);
    assert!(store.check().unwrap().is_consistent());
}

#[test]
fn errors_leave_the_store_untouched() {
    let store = DedupStore::new(FjallBackend::temporary().unwrap());
    let sizes = ChunkSizes::new(256, 1024, 8192);
    store.upload_file("a", sizes, b"original").unwrap();

    assert!(matches!(
        store.upload_file("a", sizes, b"replacement"),
        Err(Error::DuplicatePath(_))
    ));
    assert!(matches!(
        store.upload_file("b", ChunkSizes::new(8192, 1024, 256), b"x"),
        Err(Error::InvalidConfiguration(_))
    ));
    assert!(matches!(
        store.delete_file("missing"),
        Err(Error::FileNotFound(_))
    ));

    assert_eq!(store.download_file("a").unwrap(), b"original");
    assert_eq!(store.list_files().unwrap(), vec![("a".to_owned(), 8)]);
    assert!(store.check().unwrap().is_consistent());
}

#[test]
fn huge_chunk_bounds_store_small_files() {
    let store = DedupStore::new(MemBackend::new());
    let sizes = ChunkSizes::new(1 << 30, 1 << 30, 1 << 31);
    let contents = random_bytes(5, 10_000);

    let report = store.upload_file("small", sizes, &contents).unwrap();
    assert_eq!(report.chunks, 1);
    assert_eq!(store.download_file("small").unwrap(), contents);

    let widest = ChunkSizes::new(1 << 31, 1 << 31, 1 << 31);
    store.upload_file("tiny", widest, b"abc").unwrap();
    assert_eq!(store.download_file("tiny").unwrap(), b"abc");
    assert!(store.check().unwrap().is_consistent());
}
