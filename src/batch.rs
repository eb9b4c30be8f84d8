//! Per-cycle accumulation of normalized changes.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::change::{Batch, Change, StreamPosition};

/// Collects the changes of one poll cycle, in arrival order, and tracks the
/// highest offset seen per topic partition.
///
/// Offsets advance for every record observed, including records that fail
/// to decode or are filtered out, so that a stored position never replays
/// records this cycle already consumed.
///
/// Dedup is first-wins: when several records in one cycle refer to the same
/// entity, only the first occurrence is kept. Callers needing the very
/// latest state of an entity re-query it downstream rather than relying on
/// every intermediate change being delivered.
pub struct BatchAggregator {
    changes: Vec<Change>,
    seen: HashSet<String>,
    position: StreamPosition,
    records_seen: usize,
    duplicates: usize,
    max_records: usize,
}

impl BatchAggregator {
    /// Start a cycle from the position reached by the previous one, so an
    /// empty cycle yields an empty batch with the position unchanged.
    pub fn new(position: StreamPosition, max_records: usize) -> Self {
        Self {
            changes: Vec::new(),
            seen: HashSet::new(),
            position,
            records_seen: 0,
            duplicates: 0,
            max_records,
        }
    }

    /// Account for one raw record, whatever becomes of it downstream.
    pub fn observe(
        &mut self,
        topic: &str,
        partition: i32,
        offset: i64,
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.records_seen += 1;
        self.position.advance(topic, partition, offset, timestamp);
    }

    /// Append a normalized change, dropping repeats of an entity already
    /// seen this cycle.
    pub fn push(&mut self, change: Change) {
        if !self.seen.insert(change.entity_id.clone()) {
            self.duplicates += 1;
            debug!("dropping duplicate change for {} within cycle", change.entity_id);
            return;
        }
        self.changes.push(change);
    }

    /// Whether the configured record budget for this cycle is spent.
    pub fn is_full(&self) -> bool {
        self.records_seen >= self.max_records
    }

    pub fn finish(self) -> Batch {
        debug!(
            "batch complete: {} changes from {} records ({} duplicates dropped)",
            self.changes.len(),
            self.records_seen,
            self.duplicates
        );
        Batch {
            changes: self.changes,
            position: self.position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().expect("valid RFC3339 timestamp")
    }

    fn change(entity: &str, revision: i64) -> Change {
        Change::new(entity, revision, ts("2018-02-19T13:31:23Z"))
    }

    #[test]
    fn first_occurrence_wins_within_a_cycle() {
        let mut aggregator = BatchAggregator::new(StreamPosition::new(), 100);
        aggregator.push(change("Q123", 1));
        aggregator.push(change("Q123", 2));
        aggregator.push(change("Q123", 3));
        aggregator.push(change("Q42", 7));

        let batch = aggregator.finish();
        assert_eq!(batch.changes.len(), 2);
        assert_eq!(batch.changes[0].entity_id, "Q123");
        assert_eq!(batch.changes[0].revision, 1);
        assert_eq!(batch.changes[1].entity_id, "Q42");
    }

    #[test]
    fn record_budget_counts_observed_records_not_changes() {
        let mut aggregator = BatchAggregator::new(StreamPosition::new(), 3);
        for offset in 0..3 {
            aggregator.observe("mediawiki.revision-create", 0, offset, None);
        }
        assert!(aggregator.is_full());
        // filtered records still consumed their offsets
        assert!(aggregator.finish().changes.is_empty());
    }

    #[test]
    fn position_advances_for_skipped_records_too() {
        let mut aggregator = BatchAggregator::new(StreamPosition::new(), 100);
        aggregator.observe("north.mediawiki.revision-create", 0, 4, None);
        aggregator.observe("south.mediawiki.page-delete", 0, 9, None);

        let batch = aggregator.finish();
        assert_eq!(
            batch.position.offset("north.mediawiki.revision-create", 0).unwrap().offset,
            4
        );
        assert_eq!(
            batch.position.offset("south.mediawiki.page-delete", 0).unwrap().offset,
            9
        );
    }

    #[test]
    fn empty_cycle_keeps_the_prior_position() {
        let mut prior = StreamPosition::new();
        prior.advance("mediawiki.revision-create", 0, 41, None);

        let batch = BatchAggregator::new(prior.clone(), 100).finish();
        assert!(batch.is_empty());
        assert_eq!(batch.position, prior);
    }
}
