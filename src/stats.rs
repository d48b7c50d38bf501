use serde::Serialize;

use crate::datamodel::Snapshot;
use crate::error::Result;

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_files: u64,
    /// Chunk references over all files, before deduplication.
    pub total_chunks: u64,
    pub unique_chunks: u64,
    /// Logical bytes over all files.
    pub total_bytes: u64,
    /// Bytes of distinct chunks.
    pub unique_bytes: u64,
    pub total_containers: u64,
    /// Container bytes as stored, after compression.
    pub stored_bytes: u64,
    /// `total_bytes / unique_bytes`, or 0 for an empty store.
    pub deduplication_ratio: f64,
}

impl Statistics {
    /// Aggregates over one consistent snapshot.
    pub fn collect<S: Snapshot>(snapshot: &S) -> Result<Self> {
        let mut stats = Self::default();

        for entry in snapshot.files() {
            let (_, file) = entry?;
            stats.total_files += 1;
            stats.total_chunks += file.chunks.len() as u64;
            stats.total_bytes += file.size;
        }
        for entry in snapshot.chunks() {
            let (_, chunk) = entry?;
            stats.unique_chunks += 1;
            stats.unique_bytes += u64::from(chunk.size);
        }
        for entry in snapshot.containers() {
            let (_, meta) = entry?;
            stats.total_containers += 1;
            stats.stored_bytes += meta.stored_len;
        }

        stats.deduplication_ratio = deduplication_ratio(stats.total_bytes, stats.unique_bytes);
        Ok(stats)
    }
}

pub fn deduplication_ratio(total_bytes: u64, unique_bytes: u64) -> f64 {
    if total_bytes == 0 || unique_bytes == 0 {
        return 0.0;
    }
    total_bytes as f64 / unique_bytes as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ratio_guards_empty_stores() {
        assert_eq!(deduplication_ratio(0, 0), 0.0);
        assert_eq!(deduplication_ratio(10, 0), 0.0);
        assert_eq!(deduplication_ratio(0, 10), 0.0);
        assert_eq!(deduplication_ratio(300, 100), 3.0);
    }

    #[test]
    fn serializes_camel_case() {
        let stats = Statistics {
            total_files: 2,
            deduplication_ratio: 2.0,
            ..Default::default()
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["totalFiles"], 2);
        assert_eq!(json["deduplicationRatio"], 2.0);
        assert!(json.get("uniqueBytes").is_some());
    }
}
