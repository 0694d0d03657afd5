//! In-process fake transport for MCP unit tests
//!
//! [`FakeTransport::new`] returns a `(FakeTransport, FakeTransportHandle)`
//! pair. The transport is wired into the code under test; the handle scripts
//! replies per method and observes what was sent.
//!
//! ```text
//! send_request(method, params) --> handler[method](params) --> Result<Value>
//!                              \-> calls log (read via handle.calls())
//! ```
//!
//! A method with no handler answers `UpstreamFailed { code: -32601 }`, the
//! same reply a real server gives for an unknown method.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::error::{ParleyError, Result};
use crate::mcp::transport::Transport;

/// Scripted reply for one JSON-RPC method
pub type FakeHandler = Box<dyn Fn(Option<&Value>) -> Result<Value> + Send + Sync>;

#[derive(Default)]
struct FakeState {
    handlers: Mutex<HashMap<String, FakeHandler>>,
    calls: Mutex<Vec<(String, Option<Value>)>>,
    connected: AtomicBool,
    failing_connects: AtomicUsize,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

/// In-process fake transport.
pub struct FakeTransport {
    state: Arc<FakeState>,
}

/// Test-side control of a [`FakeTransport`].
#[derive(Clone)]
pub struct FakeTransportHandle {
    state: Arc<FakeState>,
}

impl std::fmt::Debug for FakeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeTransport")
            .field("connected", &self.state.connected.load(Ordering::SeqCst))
            .finish()
    }
}

impl FakeTransport {
    /// Create a new `(FakeTransport, FakeTransportHandle)` pair.
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> (Self, FakeTransportHandle) {
        let state = Arc::new(FakeState::default());
        (
            Self {
                state: Arc::clone(&state),
            },
            FakeTransportHandle { state },
        )
    }
}

impl FakeTransportHandle {
    /// Script the reply for `method`, replacing any previous handler.
    pub fn on<F>(&self, method: &str, handler: F)
    where
        F: Fn(Option<&Value>) -> Result<Value> + Send + Sync + 'static,
    {
        self.state
            .handlers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(method.to_string(), Box::new(handler));
    }

    /// Every `(method, params)` pair sent so far.
    pub fn calls(&self) -> Vec<(String, Option<Value>)> {
        self.state
            .calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Number of sent requests for `method`.
    pub fn call_count(&self, method: &str) -> usize {
        self.calls().iter().filter(|(m, _)| m == method).count()
    }

    /// Make the next `n` connect attempts fail.
    pub fn fail_next_connects(&self, n: usize) {
        self.state.failing_connects.store(n, Ordering::SeqCst);
    }

    /// Simulate the peer dropping the connection.
    pub fn drop_connection(&self) {
        self.state.connected.store(false, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn connect(&self) -> Result<()> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let pending = self.state.failing_connects.load(Ordering::SeqCst);
        if pending > 0 {
            self.state.failing_connects.store(pending - 1, Ordering::SeqCst);
            return Err(ParleyError::ConnectionFailed("fake connect failure".into()).into());
        }
        self.state.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        self.state.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if !self.is_connected() {
            return Err(ParleyError::ConnectionFailed("fake transport not connected".into()).into());
        }
        self.state
            .calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((method.to_string(), params.clone()));

        let handlers = self
            .state
            .handlers
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        match handlers.get(method) {
            Some(handler) => handler(params.as_ref()),
            None => Err(ParleyError::UpstreamFailed {
                code: -32601,
                message: format!("Method not found: {}", method),
            }
            .into()),
        }
    }

    fn is_connected(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> &'static str {
        "fake"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classify;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_reply_and_call_log() {
        let (transport, handle) = FakeTransport::new();
        handle.on("tools/list", |_| Ok(json!({"tools": []})));
        transport.connect().await.unwrap();

        let result = transport.send_request("tools/list", None).await.unwrap();
        assert_eq!(result, json!({"tools": []}));
        assert_eq!(handle.call_count("tools/list"), 1);
    }

    #[tokio::test]
    async fn test_unknown_method_is_upstream_error() {
        let (transport, _handle) = FakeTransport::new();
        transport.connect().await.unwrap();
        let err = transport.send_request("nope", None).await.unwrap_err();
        assert!(matches!(
            classify(&err),
            Some(ParleyError::UpstreamFailed { code: -32601, .. })
        ));
    }

    #[tokio::test]
    async fn test_failing_connects_are_consumed() {
        let (transport, handle) = FakeTransport::new();
        handle.fail_next_connects(1);
        assert!(transport.connect().await.is_err());
        assert!(transport.connect().await.is_ok());
        assert_eq!(handle.connect_count(), 2);
    }
}
