//! A content-defined chunking file store with chunk-level deduplication.
//!
//! Files are cut into variable-sized chunks by a rolling hash, chunks are
//! identified by their BLAKE3 fingerprint, and each distinct chunk is packed
//! once into a container. Files are rebuilt by copying their chunks back out
//! of the containers in order.

pub mod assembler;
pub mod check;
pub mod chunker;
pub mod config;
pub mod datamodel;
pub mod error;
pub mod fingerprint;
pub mod gc;
pub mod index;
pub mod packer;
pub mod server;
pub mod stats;
pub mod store;

pub use chunker::ChunkingStrategy;
pub use config::{ChunkSizes, Config};
pub use datamodel::{FjallBackend, MemBackend};
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use stats::Statistics;
pub use store::DedupStore;
