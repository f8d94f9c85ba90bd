//! JSON-lines catalog file
//!
//! Each non-empty line is one commit:
//!
//! ```json
//! {"id":"Foo","version":"1.0.0","commitTimeStamp":"2024-01-01T00:00:00Z",
//!  "type":"package-details","uri":"https://catalog/foo.1.0.0.json",
//!  "iconUrl":"https://example.com/icon.png"}
//! ```
//!
//! The file is re-read on every poll so that appended commits are picked up.

use super::{CatalogClient, CatalogError, CatalogResult, CommitItem, LeafKind, PackageDetails, PackageIdentity};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct CatalogLine {
    id: String,
    version: String,
    #[serde(rename = "commitTimeStamp")]
    commit_timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    kind: LeafKind,
    uri: String,
    #[serde(flatten)]
    details: PackageDetails,
}

/// Catalog client backed by a local JSON-lines file
pub struct JsonlCatalog {
    path: PathBuf,
    details: DashMap<String, PackageDetails>,
}

impl JsonlCatalog {
    /// Creates a client for the catalog file at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            details: DashMap::new(),
        }
    }

    fn parse(&self, content: &str) -> CatalogResult<Vec<(CommitItem, PackageDetails)>> {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                let parsed: CatalogLine = serde_json::from_str(line).map_err(|e| {
                    CatalogError::Fatal(format!(
                        "{}:{}: {}",
                        self.path.display(),
                        index + 1,
                        e
                    ))
                })?;
                let item = CommitItem {
                    identity: PackageIdentity::new(parsed.id, &parsed.version),
                    commit_timestamp: parsed.commit_timestamp,
                    uri: parsed.uri,
                    kind: parsed.kind,
                };
                Ok((item, parsed.details))
            })
            .collect()
    }
}

#[async_trait]
impl CatalogClient for JsonlCatalog {
    async fn fetch_items(
        &self,
        after: DateTime<Utc>,
        up_to: DateTime<Utc>,
    ) -> CatalogResult<Vec<CommitItem>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(CatalogError::Fatal(format!(
                    "Catalog file {} does not exist",
                    self.path.display()
                )));
            }
            Err(e) => {
                return Err(CatalogError::Transient(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        // Details are only kept for the range fetched last
        self.details.clear();
        let mut items = Vec::new();
        for (item, details) in self.parse(&content)? {
            if item.commit_timestamp <= after || item.commit_timestamp > up_to {
                continue;
            }
            self.details.insert(item.uri.clone(), details);
            items.push(item);
        }

        items.sort_by_key(|item| item.commit_timestamp);
        tracing::debug!(
            "Read {} catalog items in ({}, {}] from {}",
            items.len(),
            after,
            up_to,
            self.path.display()
        );
        Ok(items)
    }

    async fn fetch_details(&self, item: &CommitItem) -> CatalogResult<PackageDetails> {
        self.details
            .get(&item.uri)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CatalogError::LeafNotFound(item.uri.clone()))
    }
}
