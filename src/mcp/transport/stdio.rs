//! Stdio transport for MCP child-process servers
//!
//! This module implements [`StdioTransport`], which spawns a child process
//! and exchanges JSON-RPC with it over its stdin/stdout pipes using
//! newline-delimited framing.
//!
//! # Protocol
//!
//! - Each request is written to the child's stdin as a single JSON object
//!   followed by a newline, then stdin is flushed.
//! - The reply is the next line read from the child's stdout. An empty read
//!   means the child closed its output and the connection is lost.
//! - The child's stderr is drained by a background task and logged via
//!   `tracing::debug!`; it is never treated as an error condition.
//!
//! # Lifecycle
//!
//! [`StdioTransport::connect`] spawns the child and a worker task that owns
//! the process handle and both pipes exclusively. Requests reach the worker
//! over an `mpsc` channel and replies come back on a `oneshot`, so a slow
//! child only ever stalls callers of this transport.
//!
//! Every exchange runs under `request_timeout_secs`. When the deadline
//! elapses the worker kills the child and exits, and the transport reports
//! itself disconnected so that the owning registry's reconnect path replaces
//! the process.
//!
//! [`StdioTransport::disconnect`] cancels the worker's shutdown token. A
//! request still in flight fails with `ConnectionFailed` at once, then the
//! worker closes stdin, sends SIGTERM (Unix) and waits `shutdown_grace_secs`
//! before force-killing. Dropping the transport closes the worker channel,
//! which triggers the same shutdown once the current exchange ends.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{classify, ParleyError, Result};
use crate::mcp::config::StdioTransportConfig;
use crate::mcp::envelope::validate_reply;
use crate::mcp::transport::{RequestIds, Transport};
use crate::mcp::types::JsonRpcRequest;

/// Requests queued for the worker before senders wait.
const WORKER_QUEUE: usize = 32;

/// Stdio-based MCP transport that drives a child process.
///
/// # Examples
///
/// ```no_run
/// use parley::mcp::config::StdioTransportConfig;
/// use parley::mcp::transport::stdio::StdioTransport;
/// use parley::mcp::transport::Transport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let mut cfg = StdioTransportConfig::new("npx");
/// cfg.args = vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into(), "/tmp".into()];
///
/// let transport = StdioTransport::new(cfg);
/// transport.connect().await?;
/// let tools = transport.send_request("tools/list", None).await?;
/// println!("{}", tools);
/// transport.disconnect().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    config: StdioTransportConfig,
    ids: RequestIds,
    worker: Mutex<Option<WorkerHandle>>,
    connected: Arc<AtomicBool>,
}

#[derive(Debug)]
struct WorkerHandle {
    tx: mpsc::Sender<WorkerRequest>,
    shutdown: CancellationToken,
    join: JoinHandle<()>,
}

#[derive(Debug)]
struct WorkerRequest {
    id: String,
    line: String,
    reply: oneshot::Sender<Result<serde_json::Value>>,
}

impl StdioTransport {
    /// Create a transport; no process is started until [`Transport::connect`].
    pub fn new(config: StdioTransportConfig) -> Self {
        Self {
            config,
            ids: RequestIds::new(),
            worker: Mutex::new(None),
            connected: Arc::new(AtomicBool::new(false)),
        }
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs.max(1))
    }

    fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.config.shutdown_grace_secs)
    }

    fn spawn_child(&self) -> Result<(Child, ChildStdin, ChildStdout)> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        if let Some(env) = &self.config.env {
            cmd.env_clear().envs(env);
        }
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(|e| {
            ParleyError::ConnectionFailed(format!(
                "failed to spawn MCP server `{}`: {}",
                self.config.command, e
            ))
        })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            ParleyError::ConnectionFailed("child stdin unavailable after spawn".into())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ParleyError::ConnectionFailed("child stdout unavailable after spawn".into())
        })?;

        if let Some(stderr) = child.stderr.take() {
            let command = self.config.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(
                        target: "parley::mcp::transport::stdio",
                        "mcp server `{}` stderr: {}",
                        command,
                        line
                    );
                }
            });
        }

        Ok((child, stdin, stdout))
    }
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> Result<()> {
        let mut slot = self.worker.lock().await;
        if slot.is_some() && self.is_connected() {
            return Ok(());
        }
        // A worker that exited after a timeout or lost pipe leaves a stale handle.
        if let Some(stale) = slot.take() {
            let _ = stale.join.await;
        }

        let (child, stdin, stdout) = self.spawn_child()?;
        tracing::info!(
            command = %self.config.command,
            pid = ?child.id(),
            "started MCP server process"
        );

        let (tx, rx) = mpsc::channel(WORKER_QUEUE);
        self.connected.store(true, Ordering::SeqCst);
        let worker = Worker {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            request_timeout: self.request_timeout(),
            shutdown_grace: self.shutdown_grace(),
            connected: Arc::clone(&self.connected),
            command: self.config.command.clone(),
        };
        let shutdown = CancellationToken::new();
        let join = tokio::spawn(worker.run(rx, shutdown.clone()));
        *slot = Some(WorkerHandle { tx, shutdown, join });
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            handle.shutdown.cancel();
            if let Err(e) = handle.join.await {
                tracing::warn!("stdio worker for `{}` ended abnormally: {}", self.config.command, e);
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let tx = {
            let slot = self.worker.lock().await;
            match slot.as_ref() {
                Some(handle) if self.is_connected() => handle.tx.clone(),
                _ => {
                    return Err(ParleyError::ConnectionFailed(format!(
                        "MCP server `{}` is not connected",
                        self.config.command
                    ))
                    .into())
                }
            }
        };

        let id = self.ids.next_id();
        let request = JsonRpcRequest::new(&id, method, params);
        let line = serde_json::to_string(&request).map_err(ParleyError::from)?;
        tracing::debug!(target: "parley::wire", id = %id, method, "stdio request");

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(WorkerRequest {
            id,
            line,
            reply: reply_tx,
        })
        .await
        .map_err(|_| ParleyError::ConnectionFailed("connection lost".to_string()))?;

        reply_rx.await.map_err(|_| {
            ParleyError::ConnectionFailed("connection lost: worker exited".to_string())
        })?
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn kind(&self) -> &'static str {
        "stdio"
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// Exclusive owner of the child process and its pipes
struct Worker {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    request_timeout: Duration,
    shutdown_grace: Duration,
    connected: Arc<AtomicBool>,
    command: String,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::Receiver<WorkerRequest>, shutdown: CancellationToken) {
        loop {
            let request = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => request,
                    // Every sender is gone: the transport was dropped without disconnecting.
                    None => break,
                },
            };
            let WorkerRequest { id, line, reply } = request;

            let outcome = tokio::select! {
                biased;
                _ = shutdown.cancelled() => None,
                outcome = tokio::time::timeout(self.request_timeout, self.exchange(&id, &line)) => Some(outcome),
            };
            let Some(outcome) = outcome else {
                tracing::debug!(id = %id, "MCP server `{}` disconnected mid-request", self.command);
                let _ = reply.send(Err(ParleyError::ConnectionFailed(format!(
                    "connection closed: `{}` was disconnected",
                    self.command
                ))
                .into()));
                break;
            };

            match outcome {
                Ok(Ok(value)) => {
                    let _ = reply.send(Ok(value));
                }
                Ok(Err(e)) => {
                    let lost = matches!(classify(&e), Some(ParleyError::ConnectionFailed(_)));
                    if lost {
                        self.connected.store(false, Ordering::SeqCst);
                    }
                    let _ = reply.send(Err(e));
                    if lost {
                        tracing::warn!("MCP server `{}` connection lost", self.command);
                        let _ = self.child.kill().await;
                        return;
                    }
                }
                Err(_) => {
                    tracing::warn!(
                        "MCP server `{}` did not reply within {:?}; killing it",
                        self.command,
                        self.request_timeout
                    );
                    self.connected.store(false, Ordering::SeqCst);
                    let _ = reply.send(Err(ParleyError::Timeout(format!(
                        "no reply from `{}` within {}s",
                        self.command,
                        self.request_timeout.as_secs()
                    ))
                    .into()));
                    let _ = self.child.kill().await;
                    return;
                }
            }
        }

        self.close().await;
    }

    /// Close stdin, then SIGTERM and force-kill after the grace period.
    async fn close(mut self) {
        self.connected.store(false, Ordering::SeqCst);
        drop(self.stdin);
        terminate(&mut self.child, self.shutdown_grace, &self.command).await;
    }

    async fn exchange(&mut self, id: &str, line: &str) -> Result<serde_json::Value> {
        let lost = |e: std::io::Error| ParleyError::ConnectionFailed(format!("connection lost: {}", e));

        self.stdin.write_all(line.as_bytes()).await.map_err(lost)?;
        self.stdin.write_all(b"\n").await.map_err(lost)?;
        self.stdin.flush().await.map_err(lost)?;

        let mut reply = String::new();
        let read = self.stdout.read_line(&mut reply).await.map_err(lost)?;
        if read == 0 {
            return Err(ParleyError::ConnectionFailed(
                "connection lost: server closed its output".to_string(),
            )
            .into());
        }
        tracing::debug!(target: "parley::wire", id, bytes = read, "stdio reply");
        validate_reply(&reply, id)
    }
}

/// SIGTERM, wait up to `grace`, then kill.
async fn terminate(child: &mut Child, grace: Duration, command: &str) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            // SAFETY: pid is a valid process ID obtained from tokio::process::Child.
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            tracing::debug!("MCP server `{}` exited with {}", command, status);
        }
        Ok(Err(e)) => {
            tracing::warn!("failed to wait for MCP server `{}`: {}", command, e);
        }
        Err(_) => {
            tracing::warn!(
                "MCP server `{}` ignored SIGTERM for {:?}; killing it",
                command,
                grace
            );
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> StdioTransportConfig {
        let mut cfg = StdioTransportConfig::new("sh");
        cfg.args = vec!["-c".to_string(), script.to_string()];
        cfg.request_timeout_secs = 2;
        cfg.shutdown_grace_secs = 1;
        cfg
    }

    #[tokio::test]
    async fn test_connect_nonexistent_executable_fails() {
        let transport =
            StdioTransport::new(StdioTransportConfig::new("/nonexistent/binary/that/does/not/exist"));
        let err = transport.connect().await.unwrap_err();
        assert!(matches!(classify(&err), Some(ParleyError::ConnectionFailed(_))));
        assert!(err.to_string().contains("failed to spawn"));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_send_before_connect_fails() {
        let transport = StdioTransport::new(StdioTransportConfig::new("cat"));
        let err = transport.send_request("tools/list", None).await.unwrap_err();
        assert!(matches!(classify(&err), Some(ParleyError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_echoed_request_is_malformed_reply() {
        // `cat` echoes the request back, which has no result or error.
        let transport = StdioTransport::new(StdioTransportConfig::new("cat"));
        if transport.connect().await.is_err() {
            return;
        }
        let err = transport.send_request("ping", None).await.unwrap_err();
        assert!(matches!(classify(&err), Some(ParleyError::MalformedResponse(_))));
        assert!(transport.is_connected());
        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_closed_output_is_connection_lost() {
        let transport = StdioTransport::new(sh("read line; exit 0"));
        if transport.connect().await.is_err() {
            return;
        }
        let err = transport.send_request("ping", None).await.unwrap_err();
        assert!(matches!(classify(&err), Some(ParleyError::ConnectionFailed(_))));
        assert!(err.to_string().contains("connection lost"));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_silent_server_times_out_and_disconnects() {
        let transport = StdioTransport::new(sh("sleep 30"));
        if transport.connect().await.is_err() {
            return;
        }
        let err = transport.send_request("ping", None).await.unwrap_err();
        assert!(matches!(classify(&err), Some(ParleyError::Timeout(_))));
        assert!(!transport.is_connected());

        // The slot can be reconnected after a timeout.
        transport.connect().await.unwrap();
        assert!(transport.is_connected());
        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_env_replaces_parent_environment() {
        let mut cfg = sh(r#"read line; printf '{"jsonrpc":"2.0","id":"1","result":{"v":"%s","home":"%s"}}\n' "$PARLEY_PROBE" "$HOME""#);
        let mut env = std::collections::HashMap::new();
        env.insert("PARLEY_PROBE".to_string(), "set".to_string());
        env.insert("PATH".to_string(), std::env::var("PATH").unwrap_or_default());
        cfg.env = Some(env);

        let transport = StdioTransport::new(cfg);
        if transport.connect().await.is_err() {
            return;
        }
        let result = transport.send_request("probe", None).await.unwrap();
        assert_eq!(result["v"], "set");
        assert_eq!(result["home"], "");
        transport.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_interrupts_pending_request() {
        let mut cfg = sh("sleep 60");
        cfg.request_timeout_secs = 30;
        let transport = Arc::new(StdioTransport::new(cfg));
        if transport.connect().await.is_err() {
            return;
        }

        let pending = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.send_request("ping", None).await })
        };
        tokio::time::sleep(Duration::from_millis(300)).await;

        let started = std::time::Instant::now();
        transport.disconnect().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(!transport.is_connected());

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(classify(&err), Some(ParleyError::ConnectionFailed(_))));
        assert!(err.to_string().contains("disconnected"));
    }

    #[tokio::test]
    async fn test_disconnect_twice_is_noop() {
        let transport = StdioTransport::new(StdioTransportConfig::new("cat"));
        if transport.connect().await.is_err() {
            return;
        }
        transport.disconnect().await.unwrap();
        transport.disconnect().await.unwrap();
        assert!(!transport.is_connected());
    }
}
