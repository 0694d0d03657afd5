//! Test utilities for Parley
//!
//! Scripted providers and tool servers shared by the routing and engine
//! unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{ParleyError, Result};
use crate::mcp::server::{McpServer, ToolServerHandle};
use crate::mcp::transport::fake::{FakeTransport, FakeTransportHandle};
use crate::providers::{ChatTurn, Completion, GenerationOptions, ProviderClient, ProviderStats};
use crate::stats::UsageCounters;

/// Provider echoing the last turn, recording every request
#[derive(Debug)]
pub struct EchoProvider {
    name: String,
    failing: AtomicBool,
    connected: AtomicBool,
    counters: UsageCounters,
    requests: Mutex<Vec<(Vec<ChatTurn>, GenerationOptions)>>,
}

impl EchoProvider {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failing: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            counters: UsageCounters::new(),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Every `(turns, options)` pair received so far.
    pub fn requests(&self) -> Vec<(Vec<ChatTurn>, GenerationOptions)> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn last_turns(&self) -> Vec<ChatTurn> {
        self.requests().pop().map(|(t, _)| t).unwrap_or_default()
    }
}

#[async_trait]
impl ProviderClient for EchoProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get_models(&self) -> Result<Vec<String>> {
        Ok(vec!["echo-1".into()])
    }

    async fn generate(&self, turns: &[ChatTurn], options: &GenerationOptions) -> Result<Completion> {
        self.counters.record_request();
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((turns.to_vec(), options.clone()));
        if self.failing.load(Ordering::SeqCst) {
            self.counters.record_error();
            return Err(ParleyError::UpstreamFailed {
                code: 500,
                message: format!("{} is down", self.name),
            }
            .into());
        }
        let last = turns.last().map(|t| t.content.as_str()).unwrap_or_default();
        Ok(Completion {
            text: format!("{}: {}", self.name, last),
            model: "echo-1".into(),
            usage: None,
            finish_reason: Some("stop".into()),
        })
    }

    fn stats(&self) -> ProviderStats {
        let usage = self.counters.snapshot();
        ProviderStats {
            name: self.name.clone(),
            provider_type: "echo".into(),
            model: "echo-1".into(),
            connected: self.is_connected(),
            last_used: usage.last_used,
            request_count: usage.request_count,
            error_count: usage.error_count,
            success_rate: usage.success_rate,
        }
    }
}

/// A fake tool server listing `tools` whose `tools/call` answers `result`.
pub fn tool_server(
    name: &str,
    tools: &[&str],
    result: Value,
) -> (Arc<dyn ToolServerHandle>, FakeTransportHandle) {
    let (transport, handle) = FakeTransport::new();
    let listed: Vec<Value> = tools
        .iter()
        .map(|t| json!({ "name": t, "inputSchema": {} }))
        .collect();
    handle.on("initialize", |_| {
        Ok(json!({ "capabilities": { "tools": { "listChanged": true } } }))
    });
    handle.on("tools/list", move |_| Ok(json!({ "tools": listed.clone() })));
    handle.on("tools/call", move |_| Ok(result.clone()));
    (
        Arc::new(McpServer::new(name, "generic", Box::new(transport))),
        handle,
    )
}

/// Make every `tools/call` on `handle` fail.
pub fn fail_tool_calls(handle: &FakeTransportHandle) {
    handle.on("tools/call", |_| {
        Err(ParleyError::UpstreamFailed {
            code: -32603,
            message: "tool exploded".into(),
        }
        .into())
    });
}
