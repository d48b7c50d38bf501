//! Read-only consistency scan over one snapshot.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::datamodel::container::ContainerId;
use crate::datamodel::Snapshot;
use crate::error::Result;

/// A single inconsistency between files, chunks and containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Problem {
    /// A file lists a fingerprint the index does not know.
    DanglingReference { path: String, fingerprint: String },
    /// A chunk was never assigned a container.
    UnplacedChunk { fingerprint: String },
    /// A chunk points at a container that does not exist.
    MissingContainer { fingerprint: String, container: u64 },
    /// A chunk extends past the end of its container.
    ChunkOutOfBounds { fingerprint: String, container: u64 },
    /// A chunk record with no referencing file.
    UnreferencedChunk { fingerprint: String },
    /// A chunk claims a file that does not list it.
    StaleReference { fingerprint: String, path: String },
    /// A container's resident count disagrees with the chunk records.
    ResidentCountMismatch {
        container: u64,
        recorded: u32,
        actual: u32,
    },
    /// A container that no chunk lives in.
    OrphanedContainer { container: u64 },
}

#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    pub files: u64,
    pub chunks: u64,
    pub containers: u64,
    pub problems: Vec<Problem>,
}

impl IntegrityReport {
    pub fn is_consistent(&self) -> bool {
        self.problems.is_empty()
    }
}

pub fn check<S: Snapshot>(snapshot: &S) -> Result<IntegrityReport> {
    let mut report = IntegrityReport::default();

    let mut containers = BTreeMap::new();
    for entry in snapshot.containers() {
        let (id, meta) = entry?;
        containers.insert(id, meta);
    }
    report.containers = containers.len() as u64;

    let mut file_refs = HashSet::new();
    for entry in snapshot.files() {
        let (path, file) = entry?;
        report.files += 1;
        for fingerprint in &file.chunks {
            if !file_refs.insert((*fingerprint, path.clone())) {
                continue;
            }
            if snapshot.chunk(fingerprint)?.is_none() {
                report.problems.push(Problem::DanglingReference {
                    path: path.clone(),
                    fingerprint: fingerprint.to_string(),
                });
            }
        }
    }

    let mut residents: BTreeMap<ContainerId, u32> = BTreeMap::new();
    for entry in snapshot.chunks() {
        let (fingerprint, chunk) = entry?;
        report.chunks += 1;

        if chunk.files.is_empty() {
            report.problems.push(Problem::UnreferencedChunk {
                fingerprint: fingerprint.to_string(),
            });
        }
        for path in &chunk.files {
            if !file_refs.contains(&(fingerprint, path.clone())) {
                report.problems.push(Problem::StaleReference {
                    fingerprint: fingerprint.to_string(),
                    path: path.clone(),
                });
            }
        }

        let Some(placement) = chunk.placement else {
            report.problems.push(Problem::UnplacedChunk {
                fingerprint: fingerprint.to_string(),
            });
            continue;
        };
        *residents.entry(placement.container).or_default() += 1;

        match containers.get(&placement.container) {
            None => report.problems.push(Problem::MissingContainer {
                fingerprint: fingerprint.to_string(),
                container: placement.container.0,
            }),
            Some(meta) if placement.offset + u64::from(chunk.size) > meta.len => {
                report.problems.push(Problem::ChunkOutOfBounds {
                    fingerprint: fingerprint.to_string(),
                    container: placement.container.0,
                })
            }
            Some(_) => {}
        }
    }

    for (id, meta) in &containers {
        let actual = residents.get(id).copied().unwrap_or_default();
        if actual == 0 {
            report
                .problems
                .push(Problem::OrphanedContainer { container: id.0 });
        }
        if actual != meta.resident_chunks {
            report.problems.push(Problem::ResidentCountMismatch {
                container: id.0,
                recorded: meta.resident_chunks,
                actual,
            });
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datamodel::chunk::{ChunkRecord, Placement};
    use crate::datamodel::container::ContainerMeta;
    use crate::datamodel::file::FileRecord;
    use crate::datamodel::{Backend, MemBackend, Transaction};
    use crate::fingerprint::Fingerprint;

    fn meta(len: u64, resident_chunks: u32) -> ContainerMeta {
        ContainerMeta {
            len,
            stored_len: len,
            compression: Default::default(),
            resident_chunks,
        }
    }

    #[test]
    fn empty_store_is_consistent() {
        let backend = MemBackend::new();
        let report = check(&backend.snapshot().unwrap()).unwrap();
        assert!(report.is_consistent());
        assert_eq!(report.files, 0);
    }

    #[test]
    fn reports_every_kind_of_damage() {
        let backend = MemBackend::new();
        let mut tx = backend.transaction().unwrap();

        let listed = Fingerprint::of(b"listed");
        let missing = Fingerprint::of(b"missing");
        let file = FileRecord {
            size: 13,
            chunking: Default::default(),
            chunks: vec![listed, missing],
        };
        tx.put_file("a.txt", &file).unwrap();

        // placed past the end of a container that claims two residents
        let mut chunk = ChunkRecord::new(6, "a.txt");
        chunk.placement = Some(Placement {
            container: ContainerId(0),
            offset: 4,
        });
        tx.put_chunk(&listed, &chunk).unwrap();
        tx.put_container(ContainerId(0), &meta(8, 2), vec![0; 8])
            .unwrap();

        // nobody lists this one, and it was never placed
        let stray = Fingerprint::of(b"stray");
        tx.put_chunk(&stray, &ChunkRecord::new(3, "gone.txt"))
            .unwrap();

        tx.put_container(ContainerId(1), &meta(4, 0), vec![0; 4])
            .unwrap();
        tx.commit().unwrap();

        let report = check(&backend.snapshot().unwrap()).unwrap();
        assert!(!report.is_consistent());
        assert_eq!((report.files, report.chunks, report.containers), (1, 2, 2));

        let problems = &report.problems;
        assert!(problems.contains(&Problem::DanglingReference {
            path: "a.txt".into(),
            fingerprint: missing.to_string(),
        }));
        assert!(problems.contains(&Problem::ChunkOutOfBounds {
            fingerprint: listed.to_string(),
            container: 0,
        }));
        assert!(problems.contains(&Problem::StaleReference {
            fingerprint: stray.to_string(),
            path: "gone.txt".into(),
        }));
        assert!(problems.contains(&Problem::UnplacedChunk {
            fingerprint: stray.to_string(),
        }));
        assert!(problems.contains(&Problem::ResidentCountMismatch {
            container: 0,
            recorded: 2,
            actual: 1,
        }));
        assert!(problems.contains(&Problem::OrphanedContainer { container: 1 }));
        assert_eq!(problems.len(), 6);
    }
}
