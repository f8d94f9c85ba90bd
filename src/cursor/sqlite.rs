use super::{min_timestamp, CursorError, CursorResult, ReadCursor, WriteCursor};
use crate::storage::SqliteStore;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use std::sync::{Arc, Mutex, MutexGuard};

/// A named cursor persisted in the SQLite progress store
///
/// Values are stored as RFC 3339 text with microsecond precision.
#[derive(Clone)]
pub struct SqliteCursor {
    name: String,
    store: Arc<Mutex<SqliteStore>>,
}

impl SqliteCursor {
    pub fn new(name: impl Into<String>, store: Arc<Mutex<SqliteStore>>) -> Self {
        Self {
            name: name.into(),
            store,
        }
    }

    fn lock(&self) -> CursorResult<MutexGuard<'_, SqliteStore>> {
        self.store
            .lock()
            .map_err(|_| CursorError::Poisoned(self.name.clone()))
    }
}

/// Encodes a cursor value
fn encode_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[async_trait]
impl ReadCursor for SqliteCursor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self) -> CursorResult<DateTime<Utc>> {
        let raw = self
            .lock()?
            .load_cursor(&self.name)
            .map_err(|source| CursorError::Read {
                name: self.name.clone(),
                source,
            })?;

        match raw {
            None => Ok(min_timestamp()),
            Some(value) => DateTime::parse_from_rfc3339(&value)
                .map(|v| v.with_timezone(&Utc))
                .map_err(|_| CursorError::InvalidValue {
                    name: self.name.clone(),
                    value,
                }),
        }
    }
}

#[async_trait]
impl WriteCursor for SqliteCursor {
    async fn save(&self, value: DateTime<Utc>) -> CursorResult<()> {
        self.lock()?
            .save_cursor(&self.name, &encode_timestamp(value))
            .map_err(|source| CursorError::Write {
                name: self.name.clone(),
                source,
            })?;
        tracing::debug!("Cursor {} saved at {}", self.name, value);
        Ok(())
    }
}
