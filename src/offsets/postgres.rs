//! PostgreSQL-backed offsets repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, error, info};

use crate::change::StreamPosition;
use crate::error::OffsetStoreError;

use super::OffsetsRepository;

/// Offsets repository on a shared PostgreSQL store.
///
/// Rows are keyed by (consumer_group, topic, partition), so deployments
/// sharing one database do not collide as long as each partition key has a
/// single owner.
///
/// Schema:
/// ```sql
/// CREATE TABLE IF NOT EXISTS consumer_offsets (
///     consumer_group VARCHAR(255) NOT NULL,
///     topic VARCHAR(255) NOT NULL,
///     partition INT NOT NULL,
///     last_offset BIGINT NOT NULL,
///     event_time TIMESTAMPTZ,
///     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
///     PRIMARY KEY (consumer_group, topic, partition)
/// );
/// ```
#[derive(Clone)]
pub struct PostgresOffsetsRepository {
    pool: PgPool,
    consumer_group: String,
}

impl PostgresOffsetsRepository {
    pub fn new(pool: PgPool, consumer_group: impl Into<String>) -> Self {
        Self {
            pool,
            consumer_group: consumer_group.into(),
        }
    }

    /// Create the offsets table if it does not exist. Safe to call more
    /// than once.
    pub async fn initialize(&self) -> Result<(), OffsetStoreError> {
        info!("initializing consumer_offsets table");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS consumer_offsets (
                consumer_group VARCHAR(255) NOT NULL,
                topic VARCHAR(255) NOT NULL,
                partition INT NOT NULL,
                last_offset BIGINT NOT NULL,
                event_time TIMESTAMPTZ,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                PRIMARY KEY (consumer_group, topic, partition)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|err| {
            error!("failed to create consumer_offsets table: {}", err);
            OffsetStoreError::Database(err)
        })?;

        Ok(())
    }
}

#[async_trait]
impl OffsetsRepository for PostgresOffsetsRepository {
    async fn store(&self, position: &StreamPosition) -> Result<(), OffsetStoreError> {
        if position.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for (key, tracked) in position.iter() {
            sqlx::query(
                r#"
                INSERT INTO consumer_offsets
                    (consumer_group, topic, partition, last_offset, event_time, updated_at)
                VALUES ($1, $2, $3, $4, $5, NOW())
                ON CONFLICT (consumer_group, topic, partition)
                DO UPDATE SET
                    last_offset = EXCLUDED.last_offset,
                    event_time = EXCLUDED.event_time,
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(&self.consumer_group)
            .bind(&key.topic)
            .bind(key.partition)
            .bind(tracked.offset)
            .bind(tracked.timestamp)
            .execute(&mut *tx)
            .await
            .map_err(|err| {
                error!("failed to store offset for {}: {}", key, err);
                OffsetStoreError::Database(err)
            })?;
        }
        tx.commit().await?;

        debug!(
            "stored offsets for {} partitions (group {})",
            position.len(),
            self.consumer_group
        );
        Ok(())
    }

    async fn load(&self, as_of: DateTime<Utc>) -> Result<StreamPosition, OffsetStoreError> {
        let rows = sqlx::query_as::<_, (String, i32, i64, Option<DateTime<Utc>>)>(
            r#"
            SELECT topic, partition, last_offset, event_time
            FROM consumer_offsets
            WHERE consumer_group = $1
              AND (event_time IS NULL OR event_time <= $2)
            "#,
        )
        .bind(&self.consumer_group)
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| {
            error!("failed to load offsets for {}: {}", self.consumer_group, err);
            OffsetStoreError::Database(err)
        })?;

        let mut position = StreamPosition::new();
        for (topic, partition, offset, event_time) in rows {
            position.advance(&topic, partition, offset, event_time);
        }

        debug!(
            "loaded offsets for {} partitions (group {})",
            position.len(),
            self.consumer_group
        );
        Ok(position)
    }
}
