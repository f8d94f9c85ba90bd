//! Progress cursors
//!
//! A cursor is a single persisted timestamp with a name. A job reads its
//! *back* cursor as an upper bound and owns its *front* cursor as the
//! consumption checkpoint. Cursors provide no locking; one writer per job is
//! assumed.

mod sqlite;

pub use sqlite::SqliteCursor;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use thiserror::Error;

use crate::storage::StorageError;

/// Errors that can occur while loading or saving a cursor
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("Failed to read cursor {name}: {source}")]
    Read { name: String, source: StorageError },

    #[error("Failed to write cursor {name}: {source}")]
    Write { name: String, source: StorageError },

    #[error("Cursor {name} holds an invalid value: {value}")]
    InvalidValue { name: String, value: String },

    #[error("Cursor {0} lock was poisoned")]
    Poisoned(String),
}

/// Result type for cursor operations
pub type CursorResult<T> = Result<T, CursorError>;

/// Value of a cursor that has never been saved
pub fn min_timestamp() -> DateTime<Utc> {
    DateTime::<Utc>::from(std::time::UNIX_EPOCH)
}

/// Read access to a cursor
#[async_trait]
pub trait ReadCursor: Send + Sync {
    /// Name the cursor is stored under
    fn name(&self) -> &str;

    /// Loads the current value, or [`min_timestamp`] if none was saved
    async fn load(&self) -> CursorResult<DateTime<Utc>>;
}

/// Read-write access to a cursor
#[async_trait]
pub trait WriteCursor: ReadCursor {
    /// Persists a new value
    async fn save(&self, value: DateTime<Utc>) -> CursorResult<()>;
}

/// A cursor held in memory
///
/// Used as a fixed back bound, or as a throwaway front cursor.
#[derive(Debug)]
pub struct MemoryCursor {
    name: String,
    value: Mutex<DateTime<Utc>>,
}

impl MemoryCursor {
    pub fn new(name: impl Into<String>, value: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            value: Mutex::new(value),
        }
    }

    /// A back cursor that never limits progress
    pub fn max() -> Self {
        Self::new("max", DateTime::<Utc>::MAX_UTC)
    }

    /// A cursor that starts at [`min_timestamp`]
    pub fn min(name: impl Into<String>) -> Self {
        Self::new(name, min_timestamp())
    }
}

#[async_trait]
impl ReadCursor for MemoryCursor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> CursorResult<DateTime<Utc>> {
        self.value
            .lock()
            .map(|v| *v)
            .map_err(|_| CursorError::Poisoned(self.name.clone()))
    }
}

#[async_trait]
impl WriteCursor for MemoryCursor {
    async fn save(&self, value: DateTime<Utc>) -> CursorResult<()> {
        let mut current = self
            .value
            .lock()
            .map_err(|_| CursorError::Poisoned(self.name.clone()))?;
        *current = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_cursor_roundtrip() {
        let cursor = MemoryCursor::min("front");
        assert_eq!(cursor.load().await.unwrap(), min_timestamp());

        let value: DateTime<Utc> = "2024-05-01T12:00:00Z".parse().unwrap();
        cursor.save(value).await.unwrap();
        assert_eq!(cursor.load().await.unwrap(), value);
    }

    #[tokio::test]
    async fn test_max_cursor_is_after_everything() {
        let back = MemoryCursor::max();
        assert!(back.load().await.unwrap() > Utc::now());
    }
}
