//! Dispatches namespaced tool calls to a target server, with fallback,
//! retry, load balancing, and a per-server circuit breaker

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mcp_client::client::backoff_delay;
use mcp_core::{ResolutionStrategy, ServerConfig, ToolResult};
use tokio::sync::Mutex;

use crate::errors::RoutingError;
use crate::namespace::{parse_name, NamespaceManager};
use crate::registry::ServerRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Breaker {
    state: BreakerState,
    failure_count: u32,
    opened_at: Option<Instant>,
}

impl Default for Breaker {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failure_count: 0,
            opened_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CircuitBreakerConfig {
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

struct RoundRobin {
    servers: Vec<String>,
    next: AtomicUsize,
}

#[derive(Debug, Default, Clone)]
pub struct RoutingMetrics {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub calls_per_server: HashMap<String, u64>,
    pub calls_per_tool: HashMap<String, u64>,
    pub total_latency_ms: u64,
}

impl RoutingMetrics {
    pub fn avg_latency_ms(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.total_calls as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.successful_calls as f64 / self.total_calls as f64
        }
    }
}

struct RouterState {
    resolution: HashMap<String, String>,
    fallbacks: HashMap<String, String>,
    load_balancing: HashMap<String, RoundRobin>,
    breakers: HashMap<String, Breaker>,
    retry_max_attempts: Option<u32>,
    circuit_breaker: Option<CircuitBreakerConfig>,
    metrics: RoutingMetrics,
}

pub struct Router {
    registry: Arc<ServerRegistry>,
    namespace: Arc<NamespaceManager>,
    state: Mutex<RouterState>,
    call_id: AtomicU64,
}

impl Router {
    pub fn new(registry: Arc<ServerRegistry>, namespace: Arc<NamespaceManager>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            namespace,
            state: Mutex::new(RouterState {
                resolution: HashMap::new(),
                fallbacks: HashMap::new(),
                load_balancing: HashMap::new(),
                breakers: HashMap::new(),
                retry_max_attempts: None,
                circuit_breaker: None,
                metrics: RoutingMetrics::default(),
            }),
            call_id: AtomicU64::new(0),
        })
    }

    pub async fn set_resolution(&self, tool: impl Into<String>, server: impl Into<String>) {
        self.state
            .lock()
            .await
            .resolution
            .insert(tool.into(), server.into());
    }

    pub async fn add_fallback(&self, server: impl Into<String>, fallback: impl Into<String>) {
        self.state
            .lock()
            .await
            .fallbacks
            .insert(server.into(), fallback.into());
    }

    pub async fn enable_retry(&self, max_attempts: u32) {
        self.state.lock().await.retry_max_attempts = Some(max_attempts);
    }

    pub async fn enable_load_balancing(&self, tool: impl Into<String>, servers: Vec<String>) {
        self.state.lock().await.load_balancing.insert(
            tool.into(),
            RoundRobin {
                servers,
                next: AtomicUsize::new(0),
            },
        );
    }

    pub async fn enable_circuit_breaker(&self, failure_threshold: u32, recovery_timeout: Duration) {
        self.state.lock().await.circuit_breaker = Some(CircuitBreakerConfig {
            failure_threshold,
            recovery_timeout,
        });
    }

    /// Shallow JSON-Schema check: required fields present, top-level
    /// property types match. Rich schema validation is out of scope.
    pub fn validate_arguments(
        schema: &serde_json::Value,
        args: &serde_json::Value,
    ) -> Result<(), RoutingError> {
        let Some(schema) = schema.as_object() else {
            return Ok(());
        };
        let args_obj = args.as_object();

        if let Some(required) = schema.get("required").and_then(|v| v.as_array()) {
            for field in required {
                let Some(field) = field.as_str() else { continue };
                if !args_obj.map(|o| o.contains_key(field)).unwrap_or(false) {
                    return Err(RoutingError::InvalidArguments(format!(
                        "missing required field '{field}'"
                    )));
                }
            }
        }

        if let Some(properties) = schema.get("properties").and_then(|v| v.as_object()) {
            for (name, prop) in properties {
                let Some(value) = args_obj.and_then(|o| o.get(name)) else {
                    continue;
                };
                let Some(expected) = prop.get("type").and_then(|v| v.as_str()) else {
                    continue;
                };
                if !json_type_matches(value, expected) {
                    return Err(RoutingError::InvalidArguments(format!(
                        "field '{name}' expected type '{expected}'"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Resolves a non-namespaced tool to its target server: the
    /// round-robin load-balancing map, then the explicit resolution map,
    /// then the first server exposing the tool.
    async fn resolve_server(&self, tool: &str) -> Option<String> {
        {
            let state = self.state.lock().await;
            if let Some(rr) = state.load_balancing.get(tool) {
                if !rr.servers.is_empty() {
                    let idx = rr.next.fetch_add(1, Ordering::SeqCst) % rr.servers.len();
                    return Some(rr.servers[idx].clone());
                }
            }
            if let Some(server) = state.resolution.get(tool) {
                return Some(server.clone());
            }
        }
        if let Some(server) = self.namespace.get_resolved_server(tool).await {
            return Some(server);
        }
        for instance in self.registry.get_servers_by_priority().await {
            if instance.tools.iter().any(|t| t.name == tool) {
                return Some(instance.name);
            }
        }
        None
    }

    async fn is_circuit_open(&self, server: &str) -> bool {
        let mut state = self.state.lock().await;
        let Some(cb_config) = state.circuit_breaker else {
            return false;
        };
        let breaker = state.breakers.entry(server.to_string()).or_default();
        if breaker.state == BreakerState::Open {
            let elapsed = breaker.opened_at.map(|t| t.elapsed()).unwrap_or_default();
            if elapsed >= cb_config.recovery_timeout {
                breaker.state = BreakerState::HalfOpen;
                return false;
            }
            return true;
        }
        false
    }

    async fn record_outcome(&self, server: &str, success: bool) {
        let mut state = self.state.lock().await;
        let Some(cb_config) = state.circuit_breaker else {
            return;
        };
        let breaker = state.breakers.entry(server.to_string()).or_default();
        if success {
            breaker.failure_count = 0;
            if breaker.state == BreakerState::HalfOpen || breaker.state == BreakerState::Open {
                breaker.state = BreakerState::Closed;
                breaker.opened_at = None;
            }
        } else {
            breaker.failure_count += 1;
            if breaker.state == BreakerState::HalfOpen
                || breaker.failure_count >= cb_config.failure_threshold
            {
                breaker.state = BreakerState::Open;
                breaker.opened_at = Some(Instant::now());
            }
        }
    }

    pub async fn route(
        &self,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<ToolResult, RoutingError> {
        let (prefix, tool) = parse_name(tool_name);

        let server_name = match prefix {
            Some(server) => server.to_string(),
            None => self
                .resolve_server(tool)
                .await
                .ok_or_else(|| RoutingError::ToolNotFound(tool.to_string()))?,
        };

        if server_name.contains(',') {
            return Err(RoutingError::AmbiguousMergeTarget(tool.to_string()));
        }

        if self.is_circuit_open(&server_name).await {
            return Err(RoutingError::ServerNotAvailable(server_name));
        }

        let instance = match self.registry.get_server(&server_name).await {
            Some(instance) if instance.is_available() => instance,
            _ => {
                let fallback = self.state.lock().await.fallbacks.get(&server_name).cloned();
                match fallback {
                    Some(fallback_name) => match self.registry.get_server(&fallback_name).await {
                        Some(instance) if instance.is_available() => instance,
                        _ => return Err(RoutingError::ServerNotAvailable(server_name)),
                    },
                    None => return Err(RoutingError::ServerNotAvailable(server_name)),
                }
            }
        };

        if !instance.tools.iter().any(|t| t.name == tool) {
            return Err(RoutingError::ToolNotFound(tool.to_string()));
        }

        let max_attempts = self.state.lock().await.retry_max_attempts.unwrap_or(1).max(1);
        let started = Instant::now();
        let mut last_err: Option<RoutingError> = None;
        let mut result = None;

        for attempt in 0..max_attempts {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            match instance.client.call_tool(tool, args.clone()).await {
                Ok(tool_result) if !tool_result.is_error => {
                    result = Some(tool_result);
                    last_err = None;
                    break;
                }
                Ok(tool_result) => {
                    last_err = None;
                    result = Some(tool_result);
                }
                Err(e) if !e.is_retryable() => {
                    last_err = Some(RoutingError::Client(e));
                    break;
                }
                Err(e) => {
                    last_err = Some(RoutingError::Client(e));
                }
            }
        }

        let success = last_err.is_none() && result.as_ref().map(|r| !r.is_error).unwrap_or(false);
        self.record_outcome(&instance.name, success).await;

        let mut state = self.state.lock().await;
        state.metrics.total_calls += 1;
        state.metrics.total_latency_ms += started.elapsed().as_millis() as u64;
        *state.metrics.calls_per_server.entry(instance.name.clone()).or_insert(0) += 1;
        *state.metrics.calls_per_tool.entry(tool.to_string()).or_insert(0) += 1;
        if success {
            state.metrics.successful_calls += 1;
        } else {
            state.metrics.failed_calls += 1;
        }
        drop(state);

        match (result, last_err) {
            (Some(tool_result), _) => Ok(tool_result),
            (None, Some(err)) => Err(err),
            (None, None) => Err(RoutingError::ServerNotAvailable(instance.name)),
        }
    }

    /// Parallel fan-out; preserves call order in the returned results.
    pub async fn route_batch(
        &self,
        calls: Vec<(String, serde_json::Value)>,
    ) -> Vec<Result<ToolResult, RoutingError>> {
        let futures = calls
            .into_iter()
            .map(|(tool_name, args)| self.route(&tool_name, args));
        futures::future::join_all(futures).await
    }

    pub async fn get_metrics(&self) -> RoutingMetrics {
        self.state.lock().await.metrics.clone()
    }

    pub fn next_call_id(&self) -> u64 {
        self.call_id.fetch_add(1, Ordering::SeqCst)
    }
}

fn json_type_matches(value: &serde_json::Value, expected: &str) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}
