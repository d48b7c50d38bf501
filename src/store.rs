use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, instrument};

use crate::assembler;
use crate::check::{self, IntegrityReport};
use crate::chunker::ChunkingStrategy;
use crate::config::{ChunkSizes, Config};
use crate::datamodel::file::FileRecord;
use crate::datamodel::{Backend, Snapshot, Transaction};
use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;
use crate::gc::{self, GcReport};
use crate::index;
use crate::packer::ContainerPacker;
use crate::stats::Statistics;

/// What an upload stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReport {
    pub size: u64,
    pub chunks: usize,
    pub new_chunks: usize,
    pub new_bytes: u64,
    pub containers: usize,
}

/// A deduplicating file store on top of a persistence backend.
///
/// Uploads and deletes are serialized and each runs as one backend
/// transaction, so a failure leaves nothing behind. Downloads, statistics and
/// checks read from snapshots and never wait on writers.
#[derive(Debug)]
pub struct DedupStore<B> {
    backend: B,
    config: Config,
    writer: Mutex<()>,
}

impl<B: Backend> DedupStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            config: Config::default(),
            writer: Mutex::new(()),
        }
    }

    pub fn with_config(backend: B, config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            config,
            writer: Mutex::new(()),
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Stores `contents` under `path`, chunked with the rolling hash.
    pub fn upload_file(&self, path: &str, sizes: ChunkSizes, contents: &[u8]) -> Result<UploadReport> {
        self.upload_file_with(path, ChunkingStrategy::Rolling(sizes), contents)
    }

    #[instrument(skip(self, contents), fields(len = contents.len()))]
    pub fn upload_file_with(
        &self,
        path: &str,
        chunking: ChunkingStrategy,
        contents: &[u8],
    ) -> Result<UploadReport> {
        chunking.validate()?;

        let _writer = self.writer.lock();
        let mut tx = self.backend.transaction()?;
        if tx.file(path)?.is_some() {
            return Err(Error::DuplicatePath(path.to_owned()));
        }

        let ranges = chunking.split(contents)?;
        let mut packer = ContainerPacker::new(&self.config);
        let mut report = UploadReport {
            size: contents.len() as u64,
            chunks: ranges.len(),
            new_chunks: 0,
            new_bytes: 0,
            containers: 0,
        };

        let mut chunks = Vec::with_capacity(ranges.len());
        for range in ranges {
            let chunk = &contents[range];
            let fingerprint = Fingerprint::of(chunk);
            chunks.push(fingerprint);

            let lookup = index::lookup_or_insert(&mut tx, &fingerprint, chunk.len() as u32, path)?;
            if lookup.is_new() {
                report.new_chunks += 1;
                report.new_bytes += chunk.len() as u64;
                packer.append(&mut tx, fingerprint, chunk)?;
            }
        }
        report.containers = packer.finish(&mut tx)?.len();

        let file = FileRecord {
            size: report.size,
            chunking,
            chunks,
        };
        tx.put_file(path, &file)?;
        tx.commit()?;

        info!(
            %file,
            new_chunks = report.new_chunks,
            new_bytes = report.new_bytes,
            containers = report.containers,
            "stored file"
        );
        Ok(report)
    }

    #[instrument(skip(self))]
    pub fn download_file(&self, path: &str) -> Result<Vec<u8>> {
        let snapshot = self.backend.snapshot()?;
        let file = snapshot
            .file(path)?
            .ok_or_else(|| Error::FileNotFound(path.to_owned()))?;
        assembler::assemble(&snapshot, path, &file, self.config.verify_reads)
    }

    /// Removes `path` and garbage-collects the chunks and containers only it
    /// referenced.
    #[instrument(skip(self))]
    pub fn delete_file(&self, path: &str) -> Result<GcReport> {
        let _writer = self.writer.lock();
        let mut tx = self.backend.transaction()?;
        let file = tx
            .file(path)?
            .ok_or_else(|| Error::FileNotFound(path.to_owned()))?;

        let report = gc::collect(&mut tx, path, &file)?;
        tx.remove_file(path)?;
        tx.commit()?;

        info!(
            deleted_chunks = report.deleted_chunks,
            deleted_bytes = report.deleted_bytes,
            removed_containers = report.removed_containers.len(),
            "deleted file"
        );
        Ok(report)
    }

    pub fn contains(&self, path: &str) -> Result<bool> {
        Ok(self.backend.snapshot()?.file(path)?.is_some())
    }

    pub fn list_files(&self) -> Result<Vec<(String, u64)>> {
        let snapshot = self.backend.snapshot()?;
        snapshot
            .files()
            .map(|entry| entry.map(|(path, file)| (path, file.size)))
            .collect()
    }

    pub fn statistics(&self) -> Result<Statistics> {
        Statistics::collect(&self.backend.snapshot()?)
    }

    pub fn check(&self) -> Result<IntegrityReport> {
        check::check(&self.backend.snapshot()?)
    }
}
