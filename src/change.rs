use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};

/// A normalized entity change, the unit handed to re-indexing callers.
///
/// `revision` is [`Change::NO_REVISION`] for change kinds that carry no
/// revision number (page deletes and page property changes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Stable external entity identifier (e.g. "Q123"). Never empty.
    pub entity_id: String,
    pub revision: i64,
    pub timestamp: DateTime<Utc>,
}

impl Change {
    /// Sentinel revision for change kinds without an applicable revision.
    pub const NO_REVISION: i64 = -1;

    pub fn new(entity_id: impl Into<String>, revision: i64, timestamp: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.into(),
            revision,
            timestamp,
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} ({})", self.entity_id, self.revision, self.timestamp)
    }
}

/// Key identifying one partition of one concrete topic.
///
/// Offsets are keyed by the concrete (cluster-prefixed) topic name, so the
/// same canonical topic in two clusters is tracked independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.topic, self.partition)
    }
}

/// Last-consumed offset for one topic partition, with the event time
/// recorded at that offset when it is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedOffset {
    pub offset: i64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Snapshot of consumption progress across all subscribed partitions.
///
/// A plain value the caller can snapshot, persist and replay; there is no
/// hidden consumer-client state behind it. Within one poller instance the
/// offset for a given key never regresses across successive snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamPosition {
    entries: HashMap<TopicPartition, TrackedOffset>,
}

impl StreamPosition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observed offset, keeping the highest value per key.
    pub fn advance(
        &mut self,
        topic: &str,
        partition: i32,
        offset: i64,
        timestamp: Option<DateTime<Utc>>,
    ) {
        let key = TopicPartition::new(topic, partition);
        match self.entries.get_mut(&key) {
            Some(tracked) if tracked.offset >= offset => {}
            Some(tracked) => *tracked = TrackedOffset { offset, timestamp },
            None => {
                self.entries.insert(key, TrackedOffset { offset, timestamp });
            }
        }
    }

    pub fn offset(&self, topic: &str, partition: i32) -> Option<TrackedOffset> {
        self.entries
            .get(&TopicPartition::new(topic, partition))
            .copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TopicPartition, &TrackedOffset)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The changes produced by one poll cycle, in arrival order, paired with
/// the position reached after producing them.
///
/// Arrival order is stream order within one partition only; a batch may
/// interleave partitions in whatever order the client delivered them.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub changes: Vec<Change>,
    pub position: StreamPosition,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// The most recent event time in this batch, used by callers to report
    /// how far behind the stream head the consumer is running.
    pub fn latest_event_time(&self) -> Option<DateTime<Utc>> {
        self.changes.iter().map(|change| change.timestamp).max()
    }
}
