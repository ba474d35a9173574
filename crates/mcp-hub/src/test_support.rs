//! In-memory [`McpClient`] used across this crate's unit and integration
//! tests — no subprocess, network, or event stream involved.

#![cfg(test)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mcp_client::{ClientError, ConnectionResult, McpClient};
use mcp_core::{ConnectionState, ConnectionStats, InitializeResult, Resource, ResourceContent, Tool, ToolResult};
use tokio::sync::Mutex;

#[derive(Clone)]
pub enum CallOutcome {
    Ok(ToolResult),
    Transport(String),
}

pub struct FakeClient {
    name: String,
    state: Mutex<ConnectionState>,
    tools: Mutex<Vec<Tool>>,
    resources: Mutex<Vec<Resource>>,
    call_outcome: Mutex<CallOutcome>,
    connect_should_fail: AtomicBool,
    disconnect_called: AtomicBool,
    call_count: AtomicUsize,
    ping_ok: AtomicBool,
}

impl FakeClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(ConnectionState::Connected),
            tools: Mutex::new(Vec::new()),
            resources: Mutex::new(Vec::new()),
            call_outcome: Mutex::new(CallOutcome::Ok(ToolResult::ok("ok"))),
            connect_should_fail: AtomicBool::new(false),
            disconnect_called: AtomicBool::new(false),
            call_count: AtomicUsize::new(0),
            ping_ok: AtomicBool::new(true),
        }
    }

    pub fn disconnected(name: impl Into<String>) -> Self {
        let client = Self::new(name);
        *client.state.get_mut() = ConnectionState::Disconnected;
        client
    }

    pub fn with_tools(self, tools: Vec<Tool>) -> Self {
        *self.tools.try_lock().unwrap() = tools;
        self
    }

    pub fn with_resources(self, resources: Vec<Resource>) -> Self {
        *self.resources.try_lock().unwrap() = resources;
        self
    }

    pub async fn set_call_outcome(&self, outcome: CallOutcome) {
        *self.call_outcome.lock().await = outcome;
    }

    pub async fn disconnect_called(&self) -> bool {
        self.disconnect_called.load(Ordering::SeqCst)
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

fn tool(name: &str) -> Tool {
    Tool {
        name: name.to_string(),
        description: String::new(),
        parameters: serde_json::json!({}),
    }
}

pub fn fake_tool(name: &str) -> Tool {
    tool(name)
}

#[async_trait]
impl McpClient for FakeClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> ConnectionResult {
        if self.connect_should_fail.load(Ordering::SeqCst) {
            *self.state.lock().await = ConnectionState::Error;
            return ConnectionResult::failed("fake connect failure");
        }
        *self.state.lock().await = ConnectionState::Connected;
        ConnectionResult::ok(serde_json::json!({}))
    }

    async fn disconnect(&self) {
        self.disconnect_called.store(true, Ordering::SeqCst);
        *self.state.lock().await = ConnectionState::Disconnected;
    }

    async fn initialize(&self) -> Result<InitializeResult, ClientError> {
        Ok(InitializeResult {
            protocol_version: "2024-11-05".into(),
            capabilities: serde_json::json!({}),
        })
    }

    async fn list_tools(&self) -> Result<Vec<Tool>, ClientError> {
        Ok(self.tools.lock().await.clone())
    }

    async fn list_resources(&self) -> Result<Vec<Resource>, ClientError> {
        Ok(self.resources.lock().await.clone())
    }

    async fn call_tool(&self, _name: &str, _args: serde_json::Value) -> Result<ToolResult, ClientError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        match self.call_outcome.lock().await.clone() {
            CallOutcome::Ok(result) => Ok(result),
            CallOutcome::Transport(msg) => Err(ClientError::Connection(msg)),
        }
    }

    async fn read_resource(&self, uri: &str) -> Result<ResourceContent, ClientError> {
        Ok(ResourceContent {
            uri: uri.to_string(),
            content: mcp_core::ResourceBody::Text(format!("content for {uri}")),
        })
    }

    async fn ping(&self) -> Result<bool, ClientError> {
        Ok(self.ping_ok.load(Ordering::SeqCst))
    }

    async fn get_stats(&self) -> ConnectionStats {
        ConnectionStats::default()
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().await.is_operational()
    }
}

pub fn arc(client: FakeClient) -> Arc<dyn McpClient> {
    Arc::new(client)
}
