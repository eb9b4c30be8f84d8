//! Change-stream poller for keeping an indexed store synchronized with a
//! partitioned stream of entity-change notifications.
//!
//! The pipeline decodes heterogeneous wire events into a canonical
//! [`Change`] model, filters and deduplicates them into a [`Batch`] per
//! poll cycle, resolves where to resume consumption (persisted offsets or
//! timestamp seek) and persists progress through an [`OffsetsRepository`].
//!
//! Delivery is at-least-once: the caller acts on a batch, then stores
//! [`Poller::current_offsets`]; anything not stored is redelivered after a
//! restart, never skipped.
//!
//! ```ignore
//! use std::sync::Arc;
//! use change_stream_poller::{Poller, PollerConfig, PostgresOffsetsRepository};
//!
//! # async fn run(pool: sqlx::PgPool) -> Result<(), Box<dyn std::error::Error>> {
//! let config = PollerConfig::from_env().expect("KAFKA_BROKERS not set");
//! let offsets = Arc::new(PostgresOffsetsRepository::new(pool, config.consumer_group.clone()));
//! offsets.initialize().await?;
//!
//! let mut poller = Poller::new(config, offsets.clone())?;
//! loop {
//!     let batch = poller.next_batch().await?;
//!     // reindex the batch here, then commit progress
//!     offsets.store(&poller.current_offsets()).await?;
//! }
//! # }
//! ```

mod batch;
mod change;
mod cluster;
mod config;
mod error;
mod events;
mod offsets;
mod poller;

pub use batch::BatchAggregator;
pub use change::{Batch, Change, StreamPosition, TopicPartition, TrackedOffset};
pub use cluster::{
    ClusterRouter, ClusterTopic, CANONICAL_TOPICS, PAGE_DELETE_TOPIC,
    PAGE_PROPERTIES_CHANGE_TOPIC, PAGE_UNDELETE_TOPIC, REVISION_CREATE_TOPIC,
};
pub use config::PollerConfig;
pub use error::{DecodeError, OffsetStoreError, PollError};
pub use events::{ChangeEvent, ChangeFilter, EventDecoder, EventMeta, PageEvent, RevisionEvent};
pub use offsets::{InMemoryOffsetsRepository, OffsetsRepository, PostgresOffsetsRepository};
pub use poller::{Poller, ShutdownHandle};
