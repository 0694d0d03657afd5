//! In-memory session store
//!
//! [`SessionStore`] owns every [`Session`] behind one map-level lock, so a
//! request updating a session and the expiry sweep closing it are always
//! serialized. Sessions move one way, from active to inactive:
//!
//! - explicitly through [`SessionStore::close`]
//! - lazily when [`SessionStore::get`] finds them idle past the timeout
//! - by the periodic sweep
//! - by eviction when their user exceeds the per-user cap
//! - at shutdown
//!
//! Inactive records are kept for one more timeout period and then purged by
//! the sweep.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;

use crate::config::SessionConfig;
use crate::error::{ParleyError, Result};
use crate::events::{EventBus, EventKind};
use crate::health::PeriodicTask;
use crate::session::model::{Blob, CloseReason, Message, Session};

const EVENT_SOURCE: &str = "session_store";

/// Source of the current time
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
///
/// # Examples
///
/// ```
/// use chrono::Duration;
/// use parley::session::{Clock, ManualClock};
///
/// let clock = ManualClock::default();
/// let before = clock.now();
/// clock.advance(Duration::seconds(30));
/// assert_eq!(clock.now() - before, Duration::seconds(30));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Partial update applied by [`SessionStore::update`]
///
/// Routing blobs and metadata are merged key by key. `history` replaces the
/// stored history; `append` is added after it.
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub tool_routing: Option<Blob>,
    pub model_routing: Option<Blob>,
    pub metadata: Option<Blob>,
    pub history: Option<Vec<Message>>,
    pub append: Vec<Message>,
    pub provider: Option<String>,
}

impl SessionUpdate {
    pub fn append(message: Message) -> Self {
        Self {
            append: vec![message],
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.tool_routing.is_none()
            && self.model_routing.is_none()
            && self.metadata.is_none()
            && self.history.is_none()
            && self.append.is_empty()
            && self.provider.is_none()
    }
}

/// Store-wide counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Records held, including inactive ones awaiting purge
    pub total_sessions: usize,
    pub active_sessions: usize,
    /// Still flagged active but idle past the timeout
    pub expired_sessions: usize,
    pub unique_users: usize,
    pub user_session_counts: BTreeMap<String, usize>,
}

/// Owner of every session record
#[derive(Debug)]
pub struct SessionStore {
    config: SessionConfig,
    sessions: Mutex<HashMap<String, Session>>,
    events: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    sweep_task: Mutex<Option<PeriodicTask>>,
}

impl SessionStore {
    pub fn new(config: SessionConfig, events: Arc<EventBus>) -> Self {
        Self::with_clock(config, events, Arc::new(SystemClock))
    }

    pub fn with_clock(config: SessionConfig, events: Arc<EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            events,
            clock,
            sweep_task: Mutex::new(None),
        }
    }

    fn timeout(&self) -> Duration {
        let secs = self.config.timeout_secs.min(i64::MAX as u64 / 1000);
        Duration::seconds(secs as i64)
    }

    /// Start the periodic expiry sweep.
    pub async fn start(self: &Arc<Self>) {
        let period = std::time::Duration::from_secs(self.config.cleanup_interval_secs);
        let weak: Weak<Self> = Arc::downgrade(self);
        let task = PeriodicTask::spawn("session_sweep", period, move || {
            let weak = weak.clone();
            async move {
                if let Some(store) = weak.upgrade() {
                    store.sweep().await;
                }
            }
        });
        if let Some(previous) = self.sweep_task.lock().await.replace(task) {
            previous.stop().await;
        }
        tracing::info!(
            timeout_secs = self.config.timeout_secs,
            max_per_user = self.config.max_sessions_per_user,
            "session store started"
        );
    }

    /// Stop the sweep and close every active session.
    pub async fn stop(&self) {
        if let Some(task) = self.sweep_task.lock().await.take() {
            task.stop().await;
        }
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let mut closed = 0;
        for session in sessions.values_mut().filter(|s| s.active) {
            self.close_locked(session, CloseReason::Shutdown, now);
            closed += 1;
        }
        tracing::info!(closed, "session store stopped");
    }

    fn close_locked(&self, session: &mut Session, reason: CloseReason, now: DateTime<Utc>) {
        session.close(now);
        tracing::debug!(
            session_id = %session.session_id,
            user_id = %session.user_id,
            reason = reason.as_str(),
            "session closed"
        );
        self.events.emit(
            EventKind::SessionClosed,
            EVENT_SOURCE,
            json!({
                "session_id": session.session_id,
                "user_id": session.user_id,
                "reason": reason.as_str(),
            }),
        );
    }

    /// Create a session for `user_id`.
    ///
    /// When the user already holds `max_sessions_per_user` visible sessions,
    /// the oldest by creation time is evicted first.
    pub async fn create(&self, user_id: &str, metadata: Blob) -> Session {
        let now = self.clock.now();
        let timeout = self.timeout();
        let mut sessions = self.sessions.lock().await;

        loop {
            let owned: Vec<&Session> = sessions
                .values()
                .filter(|s| s.user_id == user_id && s.is_visible(timeout, now))
                .collect();
            if owned.len() < self.config.max_sessions_per_user {
                break;
            }
            let oldest = match owned.iter().min_by_key(|s| s.created_at) {
                Some(s) => s.session_id.clone(),
                None => break,
            };
            match sessions.get_mut(&oldest) {
                Some(session) => self.close_locked(session, CloseReason::Evicted, now),
                None => break,
            }
        }

        let session = Session::new(user_id, metadata, now);
        sessions.insert(session.session_id.clone(), session.clone());
        drop(sessions);

        tracing::info!(session_id = %session.session_id, user_id, "session created");
        self.events.emit(
            EventKind::SessionCreated,
            EVENT_SOURCE,
            json!({ "session_id": session.session_id, "user_id": user_id }),
        );
        session
    }

    /// Fetch a visible session and refresh its activity time.
    ///
    /// A session found idle past the timeout is closed and reported absent;
    /// later calls never bring it back.
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        let now = self.clock.now();
        let timeout = self.timeout();
        let mut sessions = self.sessions.lock().await;
        let session = sessions.get_mut(session_id)?;
        if !session.active {
            return None;
        }
        if session.is_expired(timeout, now) {
            self.close_locked(session, CloseReason::Expired, now);
            return None;
        }
        session.touch(now);
        Some(session.clone())
    }

    /// Close a session. Returns `false` if it was absent or already closed.
    pub async fn close(&self, session_id: &str) -> bool {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(session_id) {
            Some(session) if session.active => {
                self.close_locked(session, CloseReason::Explicit, now);
                true
            }
            _ => false,
        }
    }

    /// Run `f` against a visible session, then refresh its activity time.
    async fn modify<F>(&self, session_id: &str, f: F) -> Result<Session>
    where
        F: FnOnce(&mut Session),
    {
        let now = self.clock.now();
        let timeout = self.timeout();
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(session_id)
            .filter(|s| s.active)
            .ok_or_else(|| ParleyError::NotFound(format!("session `{}`", session_id)))?;
        if session.is_expired(timeout, now) {
            self.close_locked(session, CloseReason::Expired, now);
            return Err(ParleyError::NotFound(format!("session `{}` has expired", session_id)).into());
        }
        f(session);
        session.touch(now);
        Ok(session.clone())
    }

    /// Apply a partial update.
    ///
    /// # Errors
    ///
    /// `NotFound` if the session is absent, closed or expired.
    pub async fn update(&self, session_id: &str, update: SessionUpdate) -> Result<Session> {
        if update.is_empty() {
            return self
                .get(session_id)
                .await
                .ok_or_else(|| ParleyError::NotFound(format!("session `{}`", session_id)).into());
        }
        let session = self
            .modify(session_id, |session| {
                let SessionUpdate {
                    tool_routing,
                    model_routing,
                    metadata,
                    history,
                    append,
                    provider,
                } = update;
                if let Some(blob) = tool_routing {
                    session.context.tool_routing.extend(blob);
                }
                if let Some(blob) = model_routing {
                    session.context.model_routing.extend(blob);
                }
                if let Some(blob) = metadata {
                    session.metadata.extend(blob);
                }
                if let Some(history) = history {
                    session.context.history = history;
                }
                session.context.history.extend(append);
                if provider.is_some() {
                    session.provider = provider;
                }
            })
            .await?;
        self.events.emit(
            EventKind::SessionUpdated,
            EVENT_SOURCE,
            json!({ "session_id": session_id }),
        );
        Ok(session)
    }

    pub async fn attach_server(&self, session_id: &str, server: &str) -> Result<Session> {
        self.modify(session_id, |s| s.attach_server(server)).await
    }

    pub async fn detach_server(&self, session_id: &str, server: &str) -> Result<Session> {
        self.modify(session_id, |s| s.detach_server(server)).await
    }

    /// Select (or clear) the session's provider.
    pub async fn set_provider(&self, session_id: &str, provider: Option<&str>) -> Result<Session> {
        self.modify(session_id, |s| s.provider = provider.map(str::to_string))
            .await
    }

    /// Visible sessions of one user, oldest first.
    pub async fn user_sessions(&self, user_id: &str) -> Vec<Session> {
        let now = self.clock.now();
        let timeout = self.timeout();
        let sessions = self.sessions.lock().await;
        let mut owned: Vec<Session> = sessions
            .values()
            .filter(|s| s.user_id == user_id && s.is_visible(timeout, now))
            .cloned()
            .collect();
        owned.sort_by_key(|s| s.created_at);
        owned
    }

    /// Close idle sessions and purge long-closed records.
    ///
    /// Returns the number of sessions closed by this pass.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let timeout = self.timeout();
        let mut sessions = self.sessions.lock().await;

        let mut closed = 0;
        for session in sessions.values_mut() {
            if session.active && session.is_expired(timeout, now) {
                self.close_locked(session, CloseReason::Expired, now);
                closed += 1;
            }
        }

        let before = sessions.len();
        sessions.retain(|_, s| match s.closed_at {
            Some(at) if !s.active => now - at <= timeout,
            _ => true,
        });
        let purged = before - sessions.len();

        if closed > 0 || purged > 0 {
            tracing::info!(closed, purged, "session sweep");
        }
        closed
    }

    pub async fn stats(&self) -> SessionStats {
        let now = self.clock.now();
        let timeout = self.timeout();
        let sessions = self.sessions.lock().await;

        let mut user_session_counts = BTreeMap::new();
        let mut expired_sessions = 0;
        for session in sessions.values().filter(|s| s.active) {
            if session.is_expired(timeout, now) {
                expired_sessions += 1;
            } else {
                *user_session_counts
                    .entry(session.user_id.clone())
                    .or_insert(0) += 1;
            }
        }

        SessionStats {
            total_sessions: sessions.len(),
            active_sessions: user_session_counts.values().sum(),
            expired_sessions,
            unique_users: user_session_counts.len(),
            user_session_counts,
        }
    }
}
