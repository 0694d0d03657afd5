//! Engine facade
//!
//! [`Engine`] owns the event bus, the session store and both registries and
//! exposes the operations a front door needs: process a message, manage
//! sessions and report stats and health.
//!
//! # Examples
//!
//! ```no_run
//! use parley::config::Config;
//! use parley::engine::Engine;
//! use parley::session::{Blob, RequestKind};
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let engine = Engine::new(Config::default())?;
//! engine.start().await?;
//! let reply = engine
//!     .process_message("alice", "list files in src", None, RequestKind::Chat, Blob::new())
//!     .await?;
//! println!("{}", reply.text);
//! engine.stop().await;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::Config;
use crate::error::{ParleyError, Result};
use crate::events::{EventBus, EventKind};
use crate::mcp::{RegistryStats, ServerRegistry};
use crate::providers::{ProviderRegistry, ProviderRegistryStats, Role};
use crate::routing::{ContextBuilder, ContextUpdate, Reply, StrategyRouter};
use crate::session::{
    Blob, Message, RequestKind, Session, SessionStats, SessionStore, SessionUpdate,
};

const EVENT_SOURCE: &str = "engine";

/// Health of every component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub engine_running: bool,
    pub providers: BTreeMap<String, bool>,
    pub servers: BTreeMap<String, bool>,
    pub sessions: SessionStats,
}

/// Pre-built components for [`Engine::from_parts`]
#[derive(Debug)]
pub struct EngineParts {
    pub events: Arc<EventBus>,
    pub sessions: Arc<SessionStore>,
    pub servers: Arc<ServerRegistry>,
    pub providers: Arc<ProviderRegistry>,
}

#[derive(Debug)]
pub struct Engine {
    config: Config,
    events: Arc<EventBus>,
    sessions: Arc<SessionStore>,
    servers: Arc<ServerRegistry>,
    providers: Arc<ProviderRegistry>,
    contexts: ContextBuilder,
    router: StrategyRouter,
    running: AtomicBool,
}

impl Engine {
    /// Validate `config` and build every component from it.
    ///
    /// Nothing connects until [`Engine::start`].
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let events = Arc::new(EventBus::default());
        let parts = EngineParts {
            sessions: Arc::new(SessionStore::new(config.session.clone(), Arc::clone(&events))),
            servers: Arc::new(ServerRegistry::new(config.servers.clone(), Arc::clone(&events))),
            providers: Arc::new(ProviderRegistry::new(
                config.providers.clone(),
                Arc::clone(&events),
            )),
            events,
        };
        Self::from_parts(config, parts)
    }

    /// Assemble an engine around caller-built components.
    pub fn from_parts(config: Config, parts: EngineParts) -> Result<Self> {
        let router = StrategyRouter::new(
            config.router.clone(),
            Arc::clone(&parts.servers),
            Arc::clone(&parts.providers),
        )?;
        Ok(Self {
            contexts: ContextBuilder::new(Arc::clone(&parts.sessions)),
            router,
            config,
            events: parts.events,
            sessions: parts.sessions,
            servers: parts.servers,
            providers: parts.providers,
            running: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn servers(&self) -> &Arc<ServerRegistry> {
        &self.servers
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the session sweep, then connect providers and servers.
    ///
    /// # Errors
    ///
    /// Returns `ValidationFailed` if a configured entry is invalid; the
    /// components already started are stopped again.
    pub async fn start(&self) -> Result<()> {
        tracing::info!("starting engine");
        self.sessions.start().await;
        if let Err(e) = self.start_registries().await {
            tracing::error!("engine failed to start: {:#}", e);
            self.stop().await;
            return Err(e);
        }
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("engine started");
        Ok(())
    }

    async fn start_registries(&self) -> Result<()> {
        self.providers.start().await?;
        self.servers.start().await?;
        Ok(())
    }

    /// Stop every background task, disconnect every entry, close every session.
    pub async fn stop(&self) {
        tracing::info!("stopping engine");
        self.servers.stop().await;
        self.providers.stop().await;
        self.sessions.stop().await;
        self.running.store(false, Ordering::SeqCst);
        tracing::info!("engine stopped");
    }

    /// Process one message.
    ///
    /// With `session_id` the session must exist; without one a new session
    /// is created for `user_id`. The returned reply names the session used.
    ///
    /// # Errors
    ///
    /// `NotFound` if `session_id` is given but absent, closed or expired.
    /// Routing failures are reported in the reply, not as errors.
    pub async fn process_message(
        &self,
        user_id: &str,
        text: &str,
        session_id: Option<&str>,
        kind: RequestKind,
        metadata: Blob,
    ) -> Result<Reply> {
        let started = Instant::now();
        let session_id = match session_id {
            Some(id) => {
                self.sessions
                    .get(id)
                    .await
                    .ok_or_else(|| ParleyError::NotFound(format!("session `{}`", id)))?
                    .session_id
            }
            None => self.sessions.create(user_id, metadata.clone()).await.session_id,
        };

        let mut context = self
            .contexts
            .build(&session_id, text, kind, metadata)
            .await?;
        let analysis = context.analyze();
        tracing::debug!(
            correlation_id = %context.correlation_id,
            keywords = ?analysis.keywords,
            complexity = ?analysis.complexity,
            suggested = ?analysis.suggested_servers,
            "analyzed request"
        );

        let mut reply = self.router.route(&context).await;
        reply.session_id = session_id.clone();

        let mut message_meta = reply.metadata.clone();
        message_meta.insert("correlation_id".into(), json!(reply.correlation_id));
        message_meta.insert("status".into(), json!(reply.status.as_str()));
        let assistant = Message::new(Role::Assistant, reply.text.clone()).with_metadata(message_meta);
        self.contexts.add_message(&mut context, assistant).await?;

        // `server` is only present when the tool call succeeded.
        if let (Some(tool), Some(server)) = (reply.tool_used(), reply.metadata.get("server")) {
            let mut routing = Blob::new();
            routing.insert("last_tool".into(), json!(tool));
            routing.insert("last_server".into(), server.clone());
            self.contexts
                .update(
                    &mut context,
                    ContextUpdate {
                        tool_routing: Some(routing),
                        ..ContextUpdate::default()
                    },
                )
                .await?;
        }

        reply.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        tracing::info!(
            user_id,
            session_id = %session_id,
            correlation_id = %reply.correlation_id,
            status = reply.status.as_str(),
            duration_ms = reply.duration_ms,
            "processed message"
        );
        self.events.emit(
            EventKind::MessageProcessed,
            EVENT_SOURCE,
            json!({
                "user_id": user_id,
                "session_id": session_id,
                "kind": kind.as_str(),
                "correlation_id": reply.correlation_id,
                "status": reply.status.as_str(),
                "strategy": reply.strategy(),
                "reply_length": reply.text.chars().count(),
                "keywords": analysis.keywords,
                "duration_ms": reply.duration_ms,
            }),
        );
        Ok(reply)
    }

    pub async fn create_session(&self, user_id: &str, metadata: Blob) -> Session {
        self.sessions.create(user_id, metadata).await
    }

    pub async fn get_session(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).await
    }

    pub async fn close_session(&self, session_id: &str) -> bool {
        self.sessions.close(session_id).await
    }

    /// Select the provider used for a session's model calls.
    ///
    /// # Errors
    ///
    /// `NotFound` if the provider is not registered or the session is gone.
    pub async fn select_provider(&self, session_id: &str, provider: &str) -> Result<Session> {
        if self.providers.get(provider).await.is_none() {
            return Err(ParleyError::NotFound(format!("provider `{}`", provider)).into());
        }
        self.sessions.set_provider(session_id, Some(provider)).await
    }

    /// Pin a session's tool calls to one server.
    pub async fn attach_server(&self, session_id: &str, server: &str) -> Result<Session> {
        if self.servers.get(server).await.is_none() {
            return Err(ParleyError::NotFound(format!("server `{}`", server)).into());
        }
        let mut routing = Blob::new();
        routing.insert("server".into(), Value::String(server.to_string()));
        self.sessions
            .update(
                session_id,
                SessionUpdate {
                    tool_routing: Some(routing),
                    ..Default::default()
                },
            )
            .await?;
        self.sessions.attach_server(session_id, server).await
    }

    pub async fn session_stats(&self) -> SessionStats {
        self.sessions.stats().await
    }

    pub async fn provider_stats(&self) -> ProviderRegistryStats {
        self.providers.stats().await
    }

    pub async fn server_stats(&self) -> RegistryStats {
        self.servers.stats().await
    }

    /// Validate every provider and server, plus session counts.
    pub async fn health_check(&self) -> HealthReport {
        let (providers, servers, sessions) = futures::join!(
            self.providers.health_check(),
            self.servers.health_check(),
            self.sessions.stats()
        );
        HealthReport {
            engine_running: self.is_running(),
            providers,
            servers,
            sessions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProvidersConfig, SessionConfig};
    use crate::mcp::config::McpConfig;
    use crate::routing::ReplyStatus;
    use crate::test_utils::{tool_server, EchoProvider};

    async fn engine() -> (Engine, Arc<EchoProvider>) {
        let events = Arc::new(EventBus::default());
        let parts = EngineParts {
            sessions: Arc::new(SessionStore::new(SessionConfig::default(), Arc::clone(&events))),
            servers: Arc::new(ServerRegistry::new(McpConfig::default(), Arc::clone(&events))),
            providers: Arc::new(ProviderRegistry::new(
                ProvidersConfig::default(),
                Arc::clone(&events),
            )),
            events,
        };
        let provider = EchoProvider::new("echo");
        parts.providers.add_client(provider.clone()).await.unwrap();
        let (fs, _) = tool_server("fs", &["list_files"], json!({"files": ["a.rs"]}));
        parts.servers.add_handle(fs).await.unwrap();
        (Engine::from_parts(Config::default(), parts).unwrap(), provider)
    }

    #[tokio::test]
    async fn test_process_creates_session_and_records_history() {
        let (engine, _) = engine().await;
        let reply = engine
            .process_message("alice", "explain borrowing", None, RequestKind::Chat, Blob::new())
            .await
            .unwrap();

        assert_eq!(reply.status, ReplyStatus::Success);
        let session = engine.get_session(&reply.session_id).await.unwrap();
        let history = &session.context.history;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].metadata["correlation_id"], reply.correlation_id.as_str());
        assert_eq!(history[1].metadata["processing_strategy"], "model_only");
        assert_eq!(engine.events().count(EventKind::MessageProcessed), 1);
    }

    #[tokio::test]
    async fn test_follow_up_sees_history() {
        let (engine, provider) = engine().await;
        let first = engine
            .process_message("alice", "explain borrowing", None, RequestKind::Chat, Blob::new())
            .await
            .unwrap();
        engine
            .process_message(
                "alice",
                "why is that",
                Some(&first.session_id),
                RequestKind::Chat,
                Blob::new(),
            )
            .await
            .unwrap();

        let turns = provider.last_turns();
        let contents: Vec<_> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(
            contents,
            vec!["explain borrowing", "echo: explain borrowing", "why is that"]
        );
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let (engine, _) = engine().await;
        let err = engine
            .process_message("alice", "hi", Some("missing"), RequestKind::Chat, Blob::new())
            .await
            .unwrap_err();
        assert!(matches!(
            crate::error::classify(&err),
            Some(ParleyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_tool_reply_updates_tool_routing() {
        let (engine, _) = engine().await;
        let reply = engine
            .process_message("bob", "list files in src", None, RequestKind::Chat, Blob::new())
            .await
            .unwrap();
        assert_eq!(reply.text, "Found 1 files:\n- a.rs (unknown)");

        let session = engine.get_session(&reply.session_id).await.unwrap();
        assert_eq!(session.context.tool_routing["last_tool"], "list_files");
        assert_eq!(session.context.tool_routing["last_server"], "fs");
    }

    #[tokio::test]
    async fn test_selection_checks_registries() {
        let (engine, _) = engine().await;
        let id = engine.create_session("carol", Blob::new()).await.session_id;
        assert!(engine.select_provider(&id, "nope").await.is_err());
        let session = engine.select_provider(&id, "echo").await.unwrap();
        assert_eq!(session.provider.as_deref(), Some("echo"));

        let session = engine.attach_server(&id, "fs").await.unwrap();
        assert_eq!(session.tool_servers, vec!["fs"]);
        assert_eq!(session.context.tool_routing["server"], "fs");
    }

    #[tokio::test]
    async fn test_health_and_stats() {
        let (engine, _) = engine().await;
        engine.create_session("dave", Blob::new()).await;
        let health = engine.health_check().await;
        assert!(!health.engine_running);
        assert_eq!(health.providers.get("echo"), Some(&true));
        assert_eq!(health.servers.get("fs"), Some(&true));
        assert_eq!(health.sessions.active_sessions, 1);
        assert_eq!(engine.provider_stats().await.total, 1);
        assert_eq!(engine.server_stats().await.total, 1);
    }

    #[tokio::test]
    async fn test_stop_closes_sessions() {
        let (engine, _) = engine().await;
        let id = engine.create_session("erin", Blob::new()).await.session_id;
        engine.start().await.unwrap();
        assert!(engine.is_running());
        engine.stop().await;
        assert!(!engine.is_running());
        assert!(engine.get_session(&id).await.is_none());
        assert!(!engine.close_session(&id).await);
    }
}
