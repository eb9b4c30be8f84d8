//! Wire-event decoding and normalization.
//!
//! Each canonical topic carries one JSON schema. Records decode into a
//! [`ChangeEvent`] variant, which normalizes into the canonical [`Change`]
//! after domain and namespace filtering.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use crate::change::Change;
use crate::cluster::{
    ClusterRouter, PAGE_DELETE_TOPIC, PAGE_PROPERTIES_CHANGE_TOPIC, PAGE_UNDELETE_TOPIC,
    REVISION_CREATE_TOPIC,
};
use crate::error::DecodeError;

/// Metadata block common to every change event.
///
/// `dt` is the event time; both second and sub-second precision RFC 3339
/// input parse to the same instant type without precision loss.
#[derive(Debug, Clone, Deserialize)]
pub struct EventMeta {
    pub domain: String,
    pub dt: DateTime<Utc>,
}

/// Payload shape for change kinds that carry a revision id.
#[derive(Debug, Clone, Deserialize)]
pub struct RevisionEvent {
    pub meta: EventMeta,
    pub page_title: String,
    pub page_namespace: i64,
    pub rev_id: i64,
}

/// Payload shape for change kinds without a revision id.
#[derive(Debug, Clone, Deserialize)]
pub struct PageEvent {
    pub meta: EventMeta,
    pub page_title: String,
    pub page_namespace: i64,
}

/// A decoded stream record, one variant per wire schema.
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    RevisionCreate(RevisionEvent),
    PageDelete(PageEvent),
    PageUndelete(RevisionEvent),
    PropertiesChange(PageEvent),
}

impl ChangeEvent {
    pub fn meta(&self) -> &EventMeta {
        match self {
            Self::RevisionCreate(event) => &event.meta,
            Self::PageUndelete(event) => &event.meta,
            Self::PageDelete(event) => &event.meta,
            Self::PropertiesChange(event) => &event.meta,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            Self::RevisionCreate(event) => &event.page_title,
            Self::PageUndelete(event) => &event.page_title,
            Self::PageDelete(event) => &event.page_title,
            Self::PropertiesChange(event) => &event.page_title,
        }
    }

    pub fn namespace(&self) -> i64 {
        match self {
            Self::RevisionCreate(event) => event.page_namespace,
            Self::PageUndelete(event) => event.page_namespace,
            Self::PageDelete(event) => event.page_namespace,
            Self::PropertiesChange(event) => event.page_namespace,
        }
    }

    /// The revision this change refers to, or [`Change::NO_REVISION`] for
    /// deletes and property changes.
    pub fn revision(&self) -> i64 {
        match self {
            Self::RevisionCreate(event) => event.rev_id,
            Self::PageUndelete(event) => event.rev_id,
            Self::PageDelete(_) | Self::PropertiesChange(_) => Change::NO_REVISION,
        }
    }

    pub fn domain(&self) -> &str {
        &self.meta().domain
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.meta().dt
    }

    /// Convert to the canonical change, or `None` when the configured
    /// filters drop the event. Filtering is silent, not an error.
    pub fn into_change(self, filter: &ChangeFilter) -> Option<Change> {
        if !filter.accepts_domain(self.domain()) {
            debug!(
                "dropping event for {} from foreign domain {}",
                self.entity_id(),
                self.domain()
            );
            return None;
        }
        if !filter.accepts_namespace(self.namespace()) {
            debug!(
                "dropping event for {} outside entity namespaces (ns {})",
                self.entity_id(),
                self.namespace()
            );
            return None;
        }

        let revision = self.revision();
        let timestamp = self.timestamp();
        Some(Change::new(self.into_entity_id(), revision, timestamp))
    }

    fn into_entity_id(self) -> String {
        match self {
            Self::RevisionCreate(event) => event.page_title,
            Self::PageUndelete(event) => event.page_title,
            Self::PageDelete(event) => event.page_title,
            Self::PropertiesChange(event) => event.page_title,
        }
    }
}

/// Domain and namespace filters applied during normalization.
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    target_domain: String,
    allowed_namespaces: HashSet<i64>,
}

impl ChangeFilter {
    /// An empty `allowed_namespaces` set disables namespace filtering.
    pub fn new(target_domain: impl Into<String>, allowed_namespaces: HashSet<i64>) -> Self {
        Self {
            target_domain: target_domain.into(),
            allowed_namespaces,
        }
    }

    pub fn accepts_domain(&self, domain: &str) -> bool {
        domain == self.target_domain
    }

    pub fn accepts_namespace(&self, namespace: i64) -> bool {
        self.allowed_namespaces.is_empty() || self.allowed_namespaces.contains(&namespace)
    }
}

/// Decodes raw records into [`ChangeEvent`]s by topic.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    router: ClusterRouter,
}

impl EventDecoder {
    pub fn new(router: ClusterRouter) -> Self {
        Self { router }
    }

    /// Decode one record's payload according to its topic's schema.
    ///
    /// Total over its input: malformed payloads, unknown topics and missing
    /// required fields come back as a [`DecodeError`] for that record.
    pub fn decode(&self, concrete_topic: &str, payload: &[u8]) -> Result<ChangeEvent, DecodeError> {
        if payload.is_empty() {
            return Err(DecodeError::EmptyPayload {
                topic: concrete_topic.to_string(),
            });
        }

        match self.router.canonical_of(concrete_topic) {
            REVISION_CREATE_TOPIC => serde_json::from_slice(payload)
                .map(ChangeEvent::RevisionCreate)
                .map_err(|err| DecodeError::malformed(concrete_topic, err)),
            PAGE_DELETE_TOPIC => serde_json::from_slice(payload)
                .map(ChangeEvent::PageDelete)
                .map_err(|err| DecodeError::malformed(concrete_topic, err)),
            PAGE_UNDELETE_TOPIC => serde_json::from_slice(payload)
                .map(ChangeEvent::PageUndelete)
                .map_err(|err| DecodeError::malformed(concrete_topic, err)),
            PAGE_PROPERTIES_CHANGE_TOPIC => serde_json::from_slice(payload)
                .map(ChangeEvent::PropertiesChange)
                .map_err(|err| DecodeError::malformed(concrete_topic, err)),
            _ => Err(DecodeError::UnknownTopic {
                topic: concrete_topic.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoder() -> EventDecoder {
        EventDecoder::new(ClusterRouter::default())
    }

    fn filter() -> ChangeFilter {
        ChangeFilter::new("acme.test", HashSet::new())
    }

    #[test]
    fn decodes_a_revision_create_event() {
        let payload = br#"{
            "meta": {"domain": "acme.test", "dt": "2018-02-19T13:31:23Z"},
            "page_title": "Q123",
            "page_namespace": 0,
            "rev_id": 1
        }"#;

        let event = decoder().decode(REVISION_CREATE_TOPIC, payload).unwrap();
        assert_eq!(event.entity_id(), "Q123");
        assert_eq!(event.revision(), 1);

        let change = event.into_change(&filter()).unwrap();
        assert_eq!(change.entity_id, "Q123");
        assert_eq!(change.revision, 1);
        assert_eq!(
            change.timestamp,
            "2018-02-19T13:31:23Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn sub_second_timestamps_parse_without_precision_loss() {
        let payload = br#"{
            "meta": {"domain": "acme.test", "dt": "2018-10-24T00:28:24.1623Z"},
            "page_title": "Q123",
            "page_namespace": 0,
            "rev_id": 5
        }"#;

        let event = decoder().decode(REVISION_CREATE_TOPIC, payload).unwrap();
        assert_eq!(
            event.timestamp(),
            "2018-10-24T00:28:24.1623Z".parse::<DateTime<Utc>>().unwrap()
        );
    }

    #[test]
    fn deletes_and_property_changes_use_the_revision_sentinel() {
        let payload = br#"{
            "meta": {"domain": "acme.test", "dt": "2018-01-19T18:53:59Z"},
            "page_title": "Q47462581",
            "page_namespace": 0
        }"#;

        let delete = decoder().decode(PAGE_DELETE_TOPIC, payload).unwrap();
        assert_eq!(delete.revision(), Change::NO_REVISION);

        let props = decoder().decode(PAGE_PROPERTIES_CHANGE_TOPIC, payload).unwrap();
        assert_eq!(props.revision(), Change::NO_REVISION);
        assert_eq!(
            props.into_change(&filter()).unwrap().revision,
            Change::NO_REVISION
        );
    }

    #[test]
    fn undelete_restores_the_given_revision() {
        let payload = br#"{
            "meta": {"domain": "acme.test", "dt": "2018-01-21T09:30:46Z"},
            "page_title": "Q32451604",
            "page_namespace": 0,
            "rev_id": 565767
        }"#;

        let event = decoder().decode(PAGE_UNDELETE_TOPIC, payload).unwrap();
        assert_eq!(event.revision(), 565767);
    }

    #[test]
    fn unknown_topic_and_bad_payloads_fail_per_record() {
        let err = decoder().decode("mediawiki.page-move", b"{}").unwrap_err();
        assert!(matches!(err, DecodeError::UnknownTopic { .. }));

        let err = decoder().decode(REVISION_CREATE_TOPIC, b"").unwrap_err();
        assert!(matches!(err, DecodeError::EmptyPayload { .. }));

        let err = decoder()
            .decode(REVISION_CREATE_TOPIC, b"not json at all")
            .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));

        // rev_id is required for revision-create
        let err = decoder()
            .decode(
                REVISION_CREATE_TOPIC,
                br#"{"meta": {"domain": "acme.test", "dt": "2018-02-19T13:31:23Z"},
                     "page_title": "Q123", "page_namespace": 0}"#,
            )
            .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
        assert_eq!(err.topic(), REVISION_CREATE_TOPIC);
    }

    #[test]
    fn cluster_prefixed_topics_decode_like_their_canonical_topic() {
        let router = ClusterRouter::new(vec!["north".to_string()]);
        let decoder = EventDecoder::new(router);

        let payload = br#"{
            "meta": {"domain": "acme.test", "dt": "2018-02-19T13:31:23Z"},
            "page_title": "Q123",
            "page_namespace": 0,
            "rev_id": 1
        }"#;

        let event = decoder
            .decode("north.mediawiki.revision-create", payload)
            .unwrap();
        assert_eq!(event.entity_id(), "Q123");
    }

    #[test]
    fn foreign_domain_and_namespace_are_filtered_silently() {
        let payload = br#"{
            "meta": {"domain": "other.test", "dt": "2018-02-19T13:31:23Z"},
            "page_title": "Q123",
            "page_namespace": 0,
            "rev_id": 1
        }"#;
        let event = decoder().decode(REVISION_CREATE_TOPIC, payload).unwrap();
        assert!(event.into_change(&filter()).is_none());

        let payload = br#"{
            "meta": {"domain": "acme.test", "dt": "2018-02-19T13:31:23Z"},
            "page_title": "Talk:Q123",
            "page_namespace": 1,
            "rev_id": 1
        }"#;
        let event = decoder().decode(REVISION_CREATE_TOPIC, payload).unwrap();
        let entity_namespaces = HashSet::from([0, 120]);
        let strict = ChangeFilter::new("acme.test", entity_namespaces);
        assert!(event.clone().into_change(&strict).is_none());

        // an empty namespace set allows every namespace through
        assert!(event.into_change(&filter()).is_some());
    }
}
