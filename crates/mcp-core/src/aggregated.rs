//! Denormalized cross-server views produced by the aggregator, and the
//! namespace-conflict bookkeeping that backs them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Policy choosing which backend answers for a non-namespaced reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    PriorityBased,
    FirstWins,
    ExplicitOnly,
    Merge,
}

impl Default for ResolutionStrategy {
    fn default() -> Self {
        Self::PriorityBased
    }
}

/// A tool as seen through the aggregator's unified namespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedTool {
    pub namespaced_name: String,
    pub original_name: String,
    pub server_name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    pub priority: u8,
    pub is_available: bool,
}

/// A resource as seen through the aggregator's unified namespace, with
/// cache bookkeeping folded in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedResource {
    pub namespaced_uri: String,
    pub original_uri: String,
    pub server_name: String,
    pub name: String,
    pub description: String,
    pub mime_type: String,
    pub content: Option<String>,
    pub cached_at: Option<DateTime<Utc>>,
    pub ttl_seconds: Option<i64>,
    pub is_available: bool,
}

impl AggregatedResource {
    pub fn is_expired(&self) -> bool {
        let Some(ttl) = self.ttl_seconds else {
            return false;
        };
        match self.cached_at {
            None => true,
            Some(cached_at) => Utc::now() > cached_at + chrono::Duration::seconds(ttl),
        }
    }
}

/// One server's entry in a naming conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictDetail {
    pub server_name: String,
    pub priority: u8,
    pub item_details: serde_json::Value,
}

/// Two or more backends exposing the same non-namespaced name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespaceConflict {
    pub item_name: String,
    pub item_type: ConflictItemType,
    pub conflicts: Vec<ConflictDetail>,
    pub resolution_strategy: ResolutionStrategy,
    pub chosen_server: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictItemType {
    Tool,
    Resource,
}

impl NamespaceConflict {
    /// Invariant: every conflict has at least two entries, and
    /// when resolved under a non-MERGE strategy the winner is one of them.
    pub fn is_well_formed(&self) -> bool {
        if self.conflicts.len() < 2 {
            return false;
        }
        match (&self.chosen_server, self.resolution_strategy) {
            (None, _) => true,
            (Some(chosen), ResolutionStrategy::Merge) => chosen
                .split(',')
                .all(|s| self.conflicts.iter().any(|c| c.server_name == s.trim())),
            (Some(chosen), _) => self.conflicts.iter().any(|c| &c.server_name == chosen),
        }
    }
}

/// Snapshot of the aggregator's overall health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationMetadata {
    pub total_servers: usize,
    pub connected_servers: usize,
    pub total_tools: usize,
    pub total_resources: usize,
    pub namespace_conflicts: usize,
    pub cache_size_bytes: u64,
    pub last_updated: DateTime<Utc>,
    pub has_critical_failures: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(name: &str, priority: u8) -> ConflictDetail {
        ConflictDetail {
            server_name: name.to_string(),
            priority,
            item_details: serde_json::json!({}),
        }
    }

    #[test]
    fn well_formed_requires_at_least_two_conflicts() {
        let conflict = NamespaceConflict {
            item_name: "x".into(),
            item_type: ConflictItemType::Tool,
            conflicts: vec![detail("a", 50)],
            resolution_strategy: ResolutionStrategy::PriorityBased,
            chosen_server: None,
        };
        assert!(!conflict.is_well_formed());
    }

    #[test]
    fn chosen_server_must_be_a_conflict_participant() {
        let conflict = NamespaceConflict {
            item_name: "x".into(),
            item_type: ConflictItemType::Tool,
            conflicts: vec![detail("a", 50), detail("b", 30)],
            resolution_strategy: ResolutionStrategy::PriorityBased,
            chosen_server: Some("c".into()),
        };
        assert!(!conflict.is_well_formed());
    }

    #[test]
    fn merge_allows_comma_joined_subset() {
        let conflict = NamespaceConflict {
            item_name: "x".into(),
            item_type: ConflictItemType::Tool,
            conflicts: vec![detail("a", 50), detail("b", 30)],
            resolution_strategy: ResolutionStrategy::Merge,
            chosen_server: Some("a,b".into()),
        };
        assert!(conflict.is_well_formed());
    }

    #[test]
    fn resource_without_ttl_never_expires() {
        let resource = AggregatedResource {
            namespaced_uri: "s:u".into(),
            original_uri: "u".into(),
            server_name: "s".into(),
            name: "n".into(),
            description: "d".into(),
            mime_type: "text/plain".into(),
            content: Some("x".into()),
            cached_at: Some(Utc::now() - chrono::Duration::days(365)),
            ttl_seconds: None,
            is_available: true,
        };
        assert!(!resource.is_expired());
    }
}
