//! The poll loop: offset resolution, subscription, and batch production.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::DateTime;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::topic_partition_list::TopicPartitionList;
use rdkafka::Offset;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::batch::BatchAggregator;
use crate::change::{Batch, StreamPosition};
use crate::cluster::{ClusterRouter, CANONICAL_TOPICS};
use crate::config::PollerConfig;
use crate::error::PollError;
use crate::events::{ChangeFilter, EventDecoder};
use crate::offsets::OffsetsRepository;

/// Pulls change batches from the stream, one poll cycle per call.
///
/// A poller is driven by exactly one logical task: `next_batch` takes
/// `&mut self` and the underlying consumer handle is never shared between
/// cycles. Run one poller per cluster (or per externally-assigned partition
/// slice) to scale out; instances share nothing.
///
/// Consumption and commit are decoupled: after acting on a batch, the
/// caller passes [`Poller::current_offsets`] to the offsets repository.
/// Records delivered after the last successful store are redelivered on
/// restart, never skipped.
pub struct Poller {
    consumer: Arc<StreamConsumer>,
    repository: Arc<dyn OffsetsRepository>,
    router: ClusterRouter,
    decoder: EventDecoder,
    filter: ChangeFilter,
    config: PollerConfig,
    position: StreamPosition,
    subscribed: bool,
    closed: Arc<AtomicBool>,
}

/// Cheap handle for requesting shutdown from another task.
///
/// Safe to race with an in-flight poll: the poll observes the closed state
/// within its wait budget and returns [`PollError::Closed`].
#[derive(Clone)]
pub struct ShutdownHandle {
    consumer: Arc<StreamConsumer>,
    closed: Arc<AtomicBool>,
}

impl ShutdownHandle {
    /// Idempotent; calling it repeatedly, or before the poller ever
    /// subscribed, is a no-op.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.consumer.unsubscribe();
        info!("change poller closed");
    }
}

impl Poller {
    /// Build a poller over the configured brokers.
    ///
    /// The connection is established lazily; the first `next_batch` call
    /// resolves start offsets and assigns partitions.
    pub fn new(
        config: PollerConfig,
        repository: Arc<dyn OffsetsRepository>,
    ) -> Result<Self, PollError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &config.consumer_group)
            .set("bootstrap.servers", &config.brokers)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "30000")
            .set("enable.partition.eof", "false")
            .create()?;

        let router = ClusterRouter::new(config.cluster_names.clone());
        Ok(Self {
            consumer: Arc::new(consumer),
            repository,
            decoder: EventDecoder::new(router.clone()),
            router,
            filter: config.change_filter(),
            config,
            position: StreamPosition::new(),
            subscribed: false,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Run one poll cycle and return its batch.
    ///
    /// The first call resolves start offsets (stored offsets where present,
    /// timestamp seek otherwise) and assigns partitions. A cycle ends when
    /// the wait budget elapses or the record budget is reached; an idle
    /// cycle returns an empty batch. Failures are classified, not retried
    /// here; see [`PollError::is_retryable`].
    pub async fn next_batch(&mut self) -> Result<Batch, PollError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PollError::Closed);
        }
        if !self.subscribed {
            self.resolve_start_offsets().await?;
            self.subscribed = true;
        }

        let deadline = Instant::now() + self.config.poll_timeout;
        let mut aggregator =
            BatchAggregator::new(self.position.clone(), self.config.max_batch_size);

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(PollError::Closed);
            }
            if aggregator.is_full() {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            let record = match timeout(remaining, self.consumer.recv()).await {
                Err(_) => break, // wait budget spent
                Ok(Err(err)) => {
                    if self.closed.load(Ordering::SeqCst) {
                        return Err(PollError::Closed);
                    }
                    return Err(err.into());
                }
                Ok(Ok(record)) => record,
            };

            let event_time = record
                .timestamp()
                .to_millis()
                .and_then(DateTime::from_timestamp_millis);
            aggregator.observe(record.topic(), record.partition(), record.offset(), event_time);

            let payload = match record.payload() {
                Some(payload) => payload,
                None => {
                    debug!("record without payload on {}", record.topic());
                    continue;
                }
            };

            match self.decoder.decode(record.topic(), payload) {
                Ok(event) => {
                    if let Some(change) = event.into_change(&self.filter) {
                        aggregator.push(change);
                    }
                }
                Err(err) => {
                    warn!(
                        "skipping undecodable record at {}[{}]@{}: {}",
                        record.topic(),
                        record.partition(),
                        record.offset(),
                        err
                    );
                }
            }
        }

        let batch = aggregator.finish();
        self.position = batch.position.clone();
        Ok(batch)
    }

    /// The position reached by the most recently emitted batch, by value.
    ///
    /// Hand this to the offsets repository after acting on the batch.
    pub fn current_offsets(&self) -> StreamPosition {
        self.position.clone()
    }

    /// Handle for requesting shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            consumer: Arc::clone(&self.consumer),
            closed: Arc::clone(&self.closed),
        }
    }

    /// Release the stream connection. Idempotent, and a no-op on a poller
    /// that never subscribed.
    pub fn close(&self) {
        self.shutdown_handle().close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// For every partition to subscribe, resume after the stored offset if
    /// the repository has one, otherwise resolve one by timestamp search,
    /// falling back to the earliest available offset.
    async fn resolve_start_offsets(&self) -> Result<(), PollError> {
        let topics = self.router.topics(&CANONICAL_TOPICS);
        let stored = self.repository.load(self.config.start_time).await?;
        info!(
            "resolving start offsets for {} topics ({} stored entries)",
            topics.len(),
            stored.len()
        );

        let mut assignment = TopicPartitionList::new();
        let mut seek = TopicPartitionList::new();
        let start_ms = self.config.start_time.timestamp_millis();

        for topic in &topics {
            let metadata = self
                .consumer
                .fetch_metadata(Some(topic.as_str()), self.config.poll_timeout)?;
            for meta_topic in metadata.topics() {
                for meta_partition in meta_topic.partitions() {
                    match stored.offset(meta_topic.name(), meta_partition.id()) {
                        Some(tracked) => {
                            debug!(
                                "resuming {}[{}] after stored offset {}",
                                meta_topic.name(),
                                meta_partition.id(),
                                tracked.offset
                            );
                            assignment.add_partition_offset(
                                meta_topic.name(),
                                meta_partition.id(),
                                Offset::Offset(tracked.offset + 1),
                            )?;
                        }
                        None => {
                            seek.add_partition_offset(
                                meta_topic.name(),
                                meta_partition.id(),
                                Offset::Offset(start_ms),
                            )?;
                        }
                    }
                }
            }
        }

        if seek.count() > 0 {
            let resolved = self
                .consumer
                .offsets_for_times(seek, self.config.poll_timeout)?;
            for elem in resolved.elements() {
                let offset = match elem.offset() {
                    Offset::Offset(offset) => {
                        debug!(
                            "seeking {}[{}] to offset {} (by start time)",
                            elem.topic(),
                            elem.partition(),
                            offset
                        );
                        Offset::Offset(offset)
                    }
                    // no record at or after the start time
                    _ => Offset::Beginning,
                };
                assignment.add_partition_offset(elem.topic(), elem.partition(), offset)?;
            }
        }

        self.consumer.assign(&assignment)?;
        info!("assigned {} partitions", assignment.count());
        Ok(())
    }
}
