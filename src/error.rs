//! Error types for the change-stream poller.
//!
//! Failures split into three boundaries: per-record decode failures (skipped,
//! never abort a poll cycle), offsets-store failures, and poll failures. The
//! latter two expose `is_retryable()` so callers can branch between backing
//! off and giving up; this crate performs no internal retry loop.

use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;

/// A single stream record could not be decoded.
///
/// Always a per-record condition: the poller logs it and moves on.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown topic: {topic}")]
    UnknownTopic { topic: String },

    #[error("empty payload on topic {topic}")]
    EmptyPayload { topic: String },

    #[error("malformed event on topic {topic}: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

impl DecodeError {
    pub(crate) fn malformed(topic: &str, source: serde_json::Error) -> Self {
        Self::Malformed {
            topic: topic.to_string(),
            source,
        }
    }

    /// The concrete topic of the record that failed to decode.
    pub fn topic(&self) -> &str {
        match self {
            Self::UnknownTopic { topic } => topic,
            Self::EmptyPayload { topic } => topic,
            Self::Malformed { topic, .. } => topic,
        }
    }
}

/// Failure talking to the offsets store.
///
/// A failed `store` must be treated as if nothing was persisted; callers
/// retry with the same position rather than advancing past it.
#[derive(Debug, Error)]
pub enum OffsetStoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("offsets store error: {0}")]
    Other(#[from] anyhow::Error),
}

impl OffsetStoreError {
    /// Whether the caller should retry the same call.
    ///
    /// Pool exhaustion and connection-level I/O failures are transient;
    /// configuration errors (a malformed store URI, bad credentials baked
    /// into the pool) are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
                    | sqlx::Error::Io(_)
            ),
            Self::Other(_) => false,
        }
    }
}

/// Failure of a poll cycle or of start-offset resolution.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("offsets repository error: {0}")]
    Offsets(#[from] OffsetStoreError),

    #[error("poller is closed")]
    Closed,
}

impl PollError {
    /// Whether the caller should retry the whole poll-or-resolve call.
    ///
    /// Broker errors are transient unless they are configuration or
    /// authentication failures. A closed poller is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Kafka(err) => match err {
                KafkaError::ClientConfig(..) | KafkaError::ClientCreation(_) => false,
                other => !matches!(
                    other.rdkafka_error_code(),
                    Some(
                        RDKafkaErrorCode::Authentication
                            | RDKafkaErrorCode::SaslAuthenticationFailed
                            | RDKafkaErrorCode::TopicAuthorizationFailed
                            | RDKafkaErrorCode::GroupAuthorizationFailed
                            | RDKafkaErrorCode::ClusterAuthorizationFailed
                    )
                ),
            },
            Self::Offsets(err) => err.is_retryable(),
            Self::Closed => false,
        }
    }
}
