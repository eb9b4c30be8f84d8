//! Poller configuration.
//!
//! Everything the poller needs arrives in one explicit value at
//! construction; no global state is consulted afterwards.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::events::ChangeFilter;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Kafka brokers (comma-separated).
    pub brokers: String,
    /// Consumer group id, also the scope for persisted offsets.
    pub consumer_group: String,
    /// Cluster prefixes to subscribe across; empty means single-cluster.
    pub cluster_names: Vec<String>,
    /// Only events from this domain are normalized.
    pub target_domain: String,
    /// Namespaces to accept; empty accepts all.
    pub allowed_namespaces: HashSet<i64>,
    /// Max records consumed per poll cycle.
    pub max_batch_size: usize,
    /// Wait budget for one poll cycle.
    pub poll_timeout: Duration,
    /// Where to start consuming when no stored offset exists.
    pub start_time: DateTime<Utc>,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            consumer_group: "change-stream-poller".to_string(),
            cluster_names: Vec::new(),
            target_domain: "www.wikidata.org".to_string(),
            allowed_namespaces: HashSet::new(),
            max_batch_size: 1000,
            poll_timeout: Duration::from_secs(1),
            start_time: Utc::now(),
        }
    }
}

impl PollerConfig {
    /// Load configuration from environment variables.
    /// Returns `None` if brokers are not configured.
    pub fn from_env() -> Option<Self> {
        let brokers = std::env::var("KAFKA_BROKERS").ok()?;
        if brokers.trim().is_empty() {
            return None;
        }

        let defaults = Self::default();
        Some(Self {
            brokers,
            consumer_group: std::env::var("CHANGE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            cluster_names: std::env::var("CHANGE_CLUSTER_NAMES")
                .map(|raw| split_list(&raw))
                .unwrap_or_default(),
            target_domain: std::env::var("CHANGE_TARGET_DOMAIN")
                .unwrap_or(defaults.target_domain),
            allowed_namespaces: std::env::var("CHANGE_ALLOWED_NAMESPACES")
                .map(|raw| {
                    raw.split(',')
                        .filter_map(|part| part.trim().parse().ok())
                        .collect()
                })
                .unwrap_or_default(),
            max_batch_size: std::env::var("CHANGE_MAX_BATCH_SIZE")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(defaults.max_batch_size),
            poll_timeout: std::env::var("CHANGE_POLL_TIMEOUT_MS")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_timeout),
            start_time: std::env::var("CHANGE_START_TIME")
                .ok()
                .and_then(|raw| raw.parse::<DateTime<Utc>>().ok())
                .unwrap_or(defaults.start_time),
        })
    }

    pub fn change_filter(&self) -> ChangeFilter {
        ChangeFilter::new(self.target_domain.clone(), self.allowed_namespaces.clone())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|part| part.trim().to_string())
        .filter(|part| !part.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_namespace_filter_accepts_everything() {
        let config = PollerConfig::default();
        let filter = config.change_filter();
        assert!(filter.accepts_namespace(0));
        assert!(filter.accepts_namespace(9999));
    }

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(split_list("north, south ,"), vec!["north", "south"]);
        assert!(split_list("").is_empty());
    }
}
