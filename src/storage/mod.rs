//! Storage module
//!
//! This module contains every persistence concern of the collector:
//! - Blob storage for ingested icons, package archives and the copy-result cache
//! - SQLite persistence for cursors and run history

mod fs;
mod memory;
mod schema;
mod sqlite;
mod traits;

pub use fs::FileSystemStorage;
pub use memory::MemoryStorage;
pub use sqlite::SqliteStore;
pub use traits::{
    collect_stream, stream_from_bytes, BlobStorage, ByteStream, StorageError, StorageResult,
};

/// Represents a collector run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub batches_processed: u64,
    pub items_processed: u64,
}

/// Status of a collector run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "interrupted" => Some(Self::Interrupted),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_invalid() {
        assert_eq!(RunStatus::from_db_string("invalid"), None);
        assert_eq!(
            RunStatus::from_db_string("interrupted"),
            Some(RunStatus::Interrupted)
        );
    }
}
