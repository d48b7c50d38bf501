use thiserror::Error;

use crate::datamodel::container::ContainerId;
use crate::fingerprint::Fingerprint;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("file already exists: {0}")]
    DuplicatePath(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    /// A placement was requested for a fingerprint that was never inserted.
    #[error("no chunk record for {0}")]
    NotFound(Fingerprint),

    #[error("chunk not found: {0}")]
    ChunkNotFound(Fingerprint),

    #[error("chunk {0} has no container placement")]
    ChunkNotPlaced(Fingerprint),

    #[error("container not found: {0}")]
    ContainerNotFound(ContainerId),

    #[error("chunk {fingerprint} lies outside of container {container}")]
    ChunkOutOfBounds {
        fingerprint: Fingerprint,
        container: ContainerId,
    },

    #[error("container {0} has no resident chunks left to release")]
    ResidentCountUnderflow(ContainerId),

    #[error("chunk content does not match fingerprint {0}")]
    FingerprintMismatch(Fingerprint),

    #[error("file {path} reassembled to {actual} bytes, expected {expected}")]
    SizeMismatch {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("storage failure: {0}")]
    Storage(#[from] fjall::Error),

    #[error("record encoding failure: {0}")]
    Codec(#[from] postcard::Error),

    #[error("container compression failure: {0}")]
    Compression(#[source] std::io::Error),

    #[error("storage failure: transaction conflict")]
    Conflict,

    #[error("storage failure: {0}")]
    Backend(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// The index and the container store disagree, which means an earlier
    /// write corrupted the store.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ChunkNotFound(_)
                | Self::ChunkNotPlaced(_)
                | Self::ContainerNotFound(_)
                | Self::ChunkOutOfBounds { .. }
                | Self::ResidentCountUnderflow(_)
                | Self::FingerprintMismatch(_)
                | Self::SizeMismatch { .. }
        )
    }

    /// The persistence layer failed; the operation was rolled back.
    pub fn is_storage_failure(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Codec(_) | Self::Compression(_) | Self::Conflict | Self::Backend(_)
        )
    }
}
