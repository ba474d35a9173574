//! Name-collision detection and resolution across backends

use std::collections::{HashMap, HashSet};

use mcp_core::{ConflictDetail, ConflictItemType, NamespaceConflict, NamespaceError, ResolutionStrategy};
use regex::Regex;
use tokio::sync::Mutex;

const RESERVED_NAMESPACES: &[&str] = &["system", "internal", "meta"];

/// Splits `s` on the first `.`; `(None, s)` if there is no separator.
/// Pure function; round-trips with `create_namespaced_name`.
pub fn parse_name(s: &str) -> (Option<&str>, &str) {
    match s.split_once('.') {
        Some((server, rest)) => (Some(server), rest),
        None => (None, s),
    }
}

pub fn create_namespaced_name(server: &str, name: &str) -> String {
    format!("{server}.{name}")
}

pub fn validate_namespace(ns: &str) -> Result<(), NamespaceError> {
    let pattern = Regex::new(r"^[A-Za-z][A-Za-z0-9_-]*$").expect("static regex is valid");
    if !pattern.is_match(ns) || RESERVED_NAMESPACES.contains(&ns) {
        return Err(NamespaceError::InvalidNamespace(ns.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct NamespaceStatistics {
    pub total_conflicts: usize,
    pub tool_conflicts: usize,
    pub resource_conflicts: usize,
    pub resolved: usize,
    pub unresolved: usize,
}

struct State {
    conflicts: Vec<NamespaceConflict>,
    resolutions: HashMap<String, String>,
    strategy: ResolutionStrategy,
    reserved: HashSet<String>,
}

pub struct NamespaceManager {
    state: Mutex<State>,
}

impl Default for NamespaceManager {
    fn default() -> Self {
        Self::new(ResolutionStrategy::default())
    }
}

impl NamespaceManager {
    pub fn new(strategy: ResolutionStrategy) -> Self {
        Self {
            state: Mutex::new(State {
                conflicts: Vec::new(),
                resolutions: HashMap::new(),
                strategy,
                reserved: RESERVED_NAMESPACES.iter().map(|s| s.to_string()).collect(),
            }),
        }
    }

    pub async fn add_reserved_namespace(&self, ns: impl Into<String>) {
        self.state.lock().await.reserved.insert(ns.into());
    }

    pub async fn is_reserved(&self, ns: &str) -> bool {
        self.state.lock().await.reserved.contains(ns)
    }

    /// Resolves one conflict under `strategy` Pure given its
    /// inputs; used both by `detect_*_conflicts` and `apply_resolution_strategy`.
    pub fn resolve_conflict(
        conflict: &NamespaceConflict,
        strategy: ResolutionStrategy,
    ) -> Option<String> {
        match strategy {
            ResolutionStrategy::PriorityBased => conflict
                .conflicts
                .iter()
                .fold(None, |best: Option<&ConflictDetail>, c| match best {
                    Some(b) if c.priority > b.priority => Some(c),
                    Some(b) => Some(b),
                    None => Some(c),
                })
                .map(|c| c.server_name.clone()),
            ResolutionStrategy::FirstWins => {
                conflict.conflicts.first().map(|c| c.server_name.clone())
            }
            ResolutionStrategy::ExplicitOnly => None,
            ResolutionStrategy::Merge => Some(
                conflict
                    .conflicts
                    .iter()
                    .map(|c| c.server_name.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        }
    }

    /// `items_by_server` must be ordered by server registration/priority
    /// order — FIRST_WINS and MERGE read "first occurrence" from that
    /// order, not from hash iteration.
    async fn detect_conflicts(
        &self,
        items_by_server: &[(String, Vec<(String, serde_json::Value)>)],
        priorities: &HashMap<String, u8>,
        item_type: ConflictItemType,
    ) -> Vec<NamespaceConflict> {
        let mut by_name: Vec<(String, Vec<(String, serde_json::Value)>)> = Vec::new();
        for (server, items) in items_by_server {
            for (item_name, details) in items {
                match by_name.iter_mut().find(|(name, _)| name == item_name) {
                    Some((_, servers)) => servers.push((server.clone(), details.clone())),
                    None => by_name.push((item_name.clone(), vec![(server.clone(), details.clone())])),
                }
            }
        }

        let mut state = self.state.lock().await;
        let mut detected = Vec::new();
        for (item_name, servers) in by_name {
            if servers.len() < 2 {
                continue;
            }
            let conflicts: Vec<ConflictDetail> = servers
                .iter()
                .map(|(server, details)| ConflictDetail {
                    server_name: server.clone(),
                    priority: priorities.get(server).copied().unwrap_or(50),
                    item_details: details.clone(),
                })
                .collect();

            let mut conflict = NamespaceConflict {
                item_name: item_name.clone(),
                item_type,
                conflicts,
                resolution_strategy: state.strategy,
                chosen_server: None,
            };
            conflict.chosen_server = Self::resolve_conflict(&conflict, state.strategy);
            if let Some(chosen) = &conflict.chosen_server {
                state.resolutions.insert(item_name.clone(), chosen.clone());
            } else {
                state.resolutions.remove(&item_name);
            }
            detected.push(conflict.clone());
            state.conflicts.push(conflict);
        }
        detected
    }

    pub async fn detect_tool_conflicts(
        &self,
        tools_by_server: &[(String, Vec<(String, serde_json::Value)>)],
        priorities: &HashMap<String, u8>,
    ) -> Vec<NamespaceConflict> {
        self.detect_conflicts(tools_by_server, priorities, ConflictItemType::Tool)
            .await
    }

    pub async fn detect_resource_conflicts(
        &self,
        resources_by_server: &[(String, Vec<(String, serde_json::Value)>)],
        priorities: &HashMap<String, u8>,
    ) -> Vec<NamespaceConflict> {
        self.detect_conflicts(resources_by_server, priorities, ConflictItemType::Resource)
            .await
    }

    /// Re-resolves every stored conflict under `strategy`, updating the
    /// resolutions map (entries that resolve to nothing are removed).
    pub async fn apply_resolution_strategy(&self, strategy: ResolutionStrategy) {
        let mut state = self.state.lock().await;
        state.strategy = strategy;
        let conflicts = state.conflicts.clone();
        for mut conflict in conflicts {
            conflict.resolution_strategy = strategy;
            let resolved = Self::resolve_conflict(&conflict, strategy);
            conflict.chosen_server = resolved.clone();
            match resolved {
                Some(chosen) => {
                    state.resolutions.insert(conflict.item_name.clone(), chosen);
                }
                None => {
                    state.resolutions.remove(&conflict.item_name);
                }
            }
            if let Some(existing) = state
                .conflicts
                .iter_mut()
                .find(|c| c.item_name == conflict.item_name && c.item_type == conflict.item_type)
            {
                *existing = conflict;
            }
        }
    }

    pub async fn get_resolved_server(&self, name: &str) -> Option<String> {
        let (server, _) = parse_name(name);
        if let Some(server) = server {
            return Some(server.to_string());
        }
        self.state.lock().await.resolutions.get(name).cloned()
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.conflicts.clear();
        state.resolutions.clear();
    }

    pub async fn get_statistics(&self) -> NamespaceStatistics {
        let state = self.state.lock().await;
        let tool_conflicts = state
            .conflicts
            .iter()
            .filter(|c| c.item_type == ConflictItemType::Tool)
            .count();
        let resource_conflicts = state.conflicts.len() - tool_conflicts;
        NamespaceStatistics {
            total_conflicts: state.conflicts.len(),
            tool_conflicts,
            resource_conflicts,
            resolved: state.resolutions.len(),
            unresolved: state.conflicts.len().saturating_sub(state.resolutions.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_name_splits_on_first_dot_only() {
        assert_eq!(parse_name("a.b.c"), (Some("a"), "b.c"));
        assert_eq!(parse_name("foo"), (None, "foo"));
    }

    #[test]
    fn create_then_parse_round_trips() {
        let namespaced = create_namespaced_name("s", "t");
        assert_eq!(namespaced, "s.t");
        assert_eq!(parse_name(&namespaced), (Some("s"), "t"));
    }

    #[test]
    fn validate_namespace_rejects_reserved_and_malformed() {
        assert!(validate_namespace("system").is_err());
        assert!(validate_namespace("1abc").is_err());
        assert!(validate_namespace("my-server_1").is_ok());
    }

    fn servers_exposing(tool: &str, entries: &[(&str, u8)]) -> (
        Vec<(String, Vec<(String, serde_json::Value)>)>,
        HashMap<String, u8>,
    ) {
        let mut by_server = Vec::new();
        let mut priorities = HashMap::new();
        for (server, priority) in entries {
            by_server.push((
                server.to_string(),
                vec![(tool.to_string(), serde_json::json!({}))],
            ));
            priorities.insert(server.to_string(), *priority);
        }
        (by_server, priorities)
    }

    #[tokio::test]
    async fn priority_based_conflict_resolution_scenario() {
        let (by_server, priorities) =
            servers_exposing("execute_query", &[("db", 50), ("analytics", 30)]);
        let manager = NamespaceManager::new(ResolutionStrategy::PriorityBased);
        let conflicts = manager.detect_tool_conflicts(&by_server, &priorities).await;
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].chosen_server.as_deref(), Some("db"));
        assert_eq!(
            manager.get_resolved_server("execute_query").await.as_deref(),
            Some("db")
        );
        assert_eq!(
            manager
                .get_resolved_server("analytics.execute_query")
                .await
                .as_deref(),
            Some("analytics")
        );
    }

    #[tokio::test]
    async fn priority_tie_is_broken_by_first_occurrence() {
        let (by_server, priorities) =
            servers_exposing("execute_query", &[("db", 50), ("analytics", 50), ("cache", 50)]);
        let manager = NamespaceManager::new(ResolutionStrategy::PriorityBased);
        let conflicts = manager.detect_tool_conflicts(&by_server, &priorities).await;
        assert_eq!(conflicts[0].chosen_server.as_deref(), Some("db"));
    }

    #[tokio::test]
    async fn apply_resolution_strategy_updates_existing_conflicts() {
        let (by_server, priorities) =
            servers_exposing("execute_query", &[("db", 50), ("analytics", 30)]);
        let manager = NamespaceManager::new(ResolutionStrategy::PriorityBased);
        manager.detect_tool_conflicts(&by_server, &priorities).await;
        manager
            .apply_resolution_strategy(ResolutionStrategy::ExplicitOnly)
            .await;
        assert_eq!(manager.get_resolved_server("execute_query").await, None);
    }

    #[tokio::test]
    async fn reserved_namespaces_are_mutable_per_instance() {
        let manager = NamespaceManager::default();
        assert!(manager.is_reserved("system").await);
        assert!(!manager.is_reserved("payments").await);
        manager.add_reserved_namespace("payments").await;
        assert!(manager.is_reserved("payments").await);
    }

    #[tokio::test]
    async fn single_server_does_not_produce_a_conflict() {
        let (by_server, priorities) = servers_exposing("solo_tool", &[("only", 50)]);
        let manager = NamespaceManager::new(ResolutionStrategy::PriorityBased);
        let conflicts = manager.detect_tool_conflicts(&by_server, &priorities).await;
        assert!(conflicts.is_empty());
    }
}
