//! Commit batching strategies
//!
//! A strategy partitions the items of one commit range into ordered batches.
//! Concatenating the batches in order always gives back the input items.

use crate::catalog::CommitItem;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

/// How a commit range is split into batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum BatchingStrategy {
    /// Everything in one batch
    #[default]
    #[serde(rename = "single")]
    SingleBatch,

    /// Seal a batch whenever the next timestamp group touches a package id
    /// that the batch already contains
    #[serde(rename = "lock-step")]
    LockStep,
}

impl std::fmt::Display for BatchingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SingleBatch => write!(f, "single"),
            Self::LockStep => write!(f, "lock-step"),
        }
    }
}

/// A group of items processed and checkpointed as a unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitBatch {
    pub items: Vec<CommitItem>,

    /// Lock-step batches carry the timestamp of their first group
    pub key: Option<String>,

    /// Maximum commit timestamp of the items; the next front cursor value
    pub commit_timestamp: DateTime<Utc>,
}

impl CommitBatch {
    fn seal(items: Vec<CommitItem>, key: Option<String>) -> Option<Self> {
        let commit_timestamp = items.iter().map(|i| i.commit_timestamp).max()?;
        Some(Self {
            items,
            key,
            commit_timestamp,
        })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Splits `items` into batches according to `strategy`
pub fn create_batches(strategy: BatchingStrategy, items: Vec<CommitItem>) -> Vec<CommitBatch> {
    match strategy {
        BatchingStrategy::SingleBatch => CommitBatch::seal(items, None).into_iter().collect(),
        BatchingStrategy::LockStep => lock_step_batches(items),
    }
}

fn lock_step_batches(items: Vec<CommitItem>) -> Vec<CommitBatch> {
    let mut groups: BTreeMap<DateTime<Utc>, Vec<CommitItem>> = BTreeMap::new();
    for item in items {
        groups.entry(item.commit_timestamp).or_default().push(item);
    }

    let mut batches = Vec::new();
    let mut current: Vec<CommitItem> = Vec::new();
    let mut current_key: Option<String> = None;
    let mut batch_ids: HashSet<String> = HashSet::new();

    for (timestamp, group) in groups {
        let group_ids: HashSet<String> = group.iter().map(|i| i.identity.lower_id()).collect();

        let collisions: Vec<&String> = group_ids.intersection(&batch_ids).collect();
        if !collisions.is_empty() {
            tracing::debug!(
                "Package ids {:?} collide at {}, sealing batch",
                collisions,
                timestamp
            );
            seal_lock_step(&mut batches, std::mem::take(&mut current), current_key.take());
            batch_ids.clear();
        }

        if current.is_empty() {
            current_key = Some(timestamp.to_rfc3339_opts(SecondsFormat::Micros, true));
        }
        batch_ids.extend(group_ids);
        current.extend(group);
    }

    seal_lock_step(&mut batches, current, current_key);
    batches
}

fn seal_lock_step(batches: &mut Vec<CommitBatch>, items: Vec<CommitItem>, key: Option<String>) {
    if let Some(batch) = CommitBatch::seal(items, key) {
        tracing::debug!(
            "Sealed batch of {} items up to {}",
            batch.len(),
            batch.commit_timestamp
        );
        batches.push(batch);
    }
}
