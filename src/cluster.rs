//! Routing between canonical topic names and concrete, cluster-prefixed
//! topic names.
//!
//! Multi-datacenter deployments mirror the same change topics under a
//! cluster prefix (`north.mediawiki.revision-create`). Offsets are tracked
//! against the concrete name, so each cluster's copy of a topic advances on
//! its own.

pub const REVISION_CREATE_TOPIC: &str = "mediawiki.revision-create";
pub const PAGE_DELETE_TOPIC: &str = "mediawiki.page-delete";
pub const PAGE_UNDELETE_TOPIC: &str = "mediawiki.page-undelete";
pub const PAGE_PROPERTIES_CHANGE_TOPIC: &str = "mediawiki.page-properties-change";

/// Every canonical change topic this consumer understands.
pub const CANONICAL_TOPICS: [&str; 4] = [
    REVISION_CREATE_TOPIC,
    PAGE_DELETE_TOPIC,
    PAGE_UNDELETE_TOPIC,
    PAGE_PROPERTIES_CHANGE_TOPIC,
];

/// A concrete topic name split into its cluster prefix and canonical topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterTopic<'a> {
    pub cluster: Option<&'a str>,
    pub canonical_topic: &'a str,
}

impl ClusterTopic<'_> {
    /// The concrete topic name this pair maps back to.
    pub fn concrete(&self) -> String {
        match self.cluster {
            Some(cluster) => format!("{}.{}", cluster, self.canonical_topic),
            None => self.canonical_topic.to_string(),
        }
    }
}

/// Expands canonical topics into the concrete set to subscribe to, and maps
/// concrete names back for bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct ClusterRouter {
    clusters: Vec<String>,
}

impl ClusterRouter {
    pub fn new(clusters: Vec<String>) -> Self {
        Self { clusters }
    }

    /// The concrete topics to subscribe to: the cross product of configured
    /// clusters and canonical topics, or the canonical set unchanged in a
    /// single-cluster deployment.
    pub fn topics(&self, canonical: &[&str]) -> Vec<String> {
        if self.clusters.is_empty() {
            return canonical.iter().map(|topic| topic.to_string()).collect();
        }

        let mut topics = Vec::with_capacity(self.clusters.len() * canonical.len());
        for cluster in &self.clusters {
            for topic in canonical {
                topics.push(format!("{}.{}", cluster, topic));
            }
        }
        topics
    }

    /// Split a concrete topic into cluster prefix and canonical topic.
    ///
    /// Topics without a known cluster prefix are returned unchanged.
    pub fn split<'a>(&self, concrete: &'a str) -> ClusterTopic<'a> {
        for cluster in &self.clusters {
            if let Some(rest) = concrete.strip_prefix(cluster.as_str()) {
                if let Some(canonical) = rest.strip_prefix('.') {
                    return ClusterTopic {
                        cluster: Some(&concrete[..cluster.len()]),
                        canonical_topic: canonical,
                    };
                }
            }
        }
        ClusterTopic {
            cluster: None,
            canonical_topic: concrete,
        }
    }

    /// Strip a known cluster prefix from a concrete topic name.
    pub fn canonical_of<'a>(&self, concrete: &'a str) -> &'a str {
        self.split(concrete).canonical_topic
    }
}
