//! Durable tracking of stream-consumption position.
//!
//! The repository holds, per named consumer, the last-consumed offset for
//! each topic partition. Storing is decoupled from polling: the caller
//! stores the position of a batch only after acting on it, which is what
//! makes restart semantics at-least-once rather than lossy.

mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::change::{StreamPosition, TopicPartition, TrackedOffset};
use crate::error::OffsetStoreError;

pub use postgres::PostgresOffsetsRepository;

/// Persistent store for per-partition consumption offsets.
#[async_trait]
pub trait OffsetsRepository: Send + Sync {
    /// Durably record every (topic, partition) entry in `position`.
    ///
    /// Last-write-wins per key. A failed store means nothing was committed;
    /// callers retry with the same position, accepting redelivery over loss.
    async fn store(&self, position: &StreamPosition) -> Result<(), OffsetStoreError>;

    /// The most recently stored offset per known key as of the given time.
    ///
    /// Keys with no stored entry are simply absent, not an error; the
    /// poller falls back to timestamp-based seeking for those.
    async fn load(&self, as_of: DateTime<Utc>) -> Result<StreamPosition, OffsetStoreError>;
}

/// Offsets repository backed by process memory.
///
/// For tests and single-process deployments that can afford to re-seek by
/// timestamp after a restart.
#[derive(Default)]
pub struct InMemoryOffsetsRepository {
    entries: RwLock<HashMap<TopicPartition, TrackedOffset>>,
}

impl InMemoryOffsetsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OffsetsRepository for InMemoryOffsetsRepository {
    async fn store(&self, position: &StreamPosition) -> Result<(), OffsetStoreError> {
        let mut entries = self.entries.write().await;
        for (key, tracked) in position.iter() {
            entries.insert(key.clone(), *tracked);
        }
        Ok(())
    }

    async fn load(&self, as_of: DateTime<Utc>) -> Result<StreamPosition, OffsetStoreError> {
        let entries = self.entries.read().await;
        let mut position = StreamPosition::new();
        for (key, tracked) in entries.iter() {
            let in_scope = match tracked.timestamp {
                Some(event_time) => event_time <= as_of,
                None => true,
            };
            if in_scope {
                position.advance(&key.topic, key.partition, tracked.offset, tracked.timestamp);
            }
        }
        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().expect("valid RFC3339 timestamp")
    }

    #[tokio::test]
    async fn store_then_load_round_trips_every_key() {
        let repository = InMemoryOffsetsRepository::new();

        let mut first = StreamPosition::new();
        first.advance("topictest", 0, 1, None);
        first.advance("othertopic", 0, 2, None);
        repository.store(&first).await.unwrap();

        let loaded = repository.load(Utc::now()).await.unwrap();
        assert_eq!(loaded.offset("topictest", 0).unwrap().offset, 1);
        assert_eq!(loaded.offset("othertopic", 0).unwrap().offset, 2);

        let mut second = StreamPosition::new();
        second.advance("topictest", 0, 3, None);
        second.advance("othertopic", 0, 4, None);
        repository.store(&second).await.unwrap();

        let loaded = repository.load(Utc::now()).await.unwrap();
        assert_eq!(loaded.offset("topictest", 0).unwrap().offset, 3);
        assert_eq!(loaded.offset("othertopic", 0).unwrap().offset, 4);
    }

    #[tokio::test]
    async fn unknown_partitions_are_absent_not_errors() {
        let repository = InMemoryOffsetsRepository::new();
        let loaded = repository.load(Utc::now()).await.unwrap();
        assert!(loaded.is_empty());
        assert!(loaded.offset("topictest", 0).is_none());
    }

    #[tokio::test]
    async fn load_scopes_entries_to_the_given_time() {
        let repository = InMemoryOffsetsRepository::new();

        let mut position = StreamPosition::new();
        position.advance("topictest", 0, 10, Some(ts("2018-02-19T13:31:23Z")));
        position.advance("topictest", 1, 20, Some(ts("2020-06-01T00:00:00Z")));
        repository.store(&position).await.unwrap();

        let loaded = repository.load(ts("2019-01-01T00:00:00Z")).await.unwrap();
        assert_eq!(loaded.offset("topictest", 0).unwrap().offset, 10);
        // stored after the requested point in time, so the poller re-seeks it
        assert!(loaded.offset("topictest", 1).is_none());
    }
}
