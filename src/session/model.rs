//! Session and message records
//!
//! A [`Session`] is owned by the [`SessionStore`](super::store::SessionStore)
//! and only ever mutated through it. Callers receive clones.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::providers::Role;

/// Free-form JSON object used for routing state and metadata.
pub type Blob = Map<String, Value>;

/// Kind of request submitted by a caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    #[default]
    Chat,
    McpRequest,
    System,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Chat => "chat",
            RequestKind::McpRequest => "mcp_request",
            RequestKind::System => "system",
        }
    }
}

impl std::str::FromStr for RequestKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "chat" => Ok(RequestKind::Chat),
            "mcp_request" => Ok(RequestKind::McpRequest),
            "system" => Ok(RequestKind::System),
            other => Err(format!(
                "unknown request kind `{}` (expected chat, mcp_request or system)",
                other
            )),
        }
    }
}

/// One immutable entry of a conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub content: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Blob,
}

impl Message {
    /// Create a message with a fresh id and the current time.
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::providers::Role;
    /// use parley::session::Message;
    ///
    /// let msg = Message::new(Role::User, "hello");
    /// assert_eq!(msg.role, Role::User);
    /// assert!(!msg.id.is_empty());
    /// ```
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content: content.into(),
            role,
            timestamp: Utc::now(),
            metadata: Blob::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_metadata(mut self, metadata: Blob) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Per-session conversation state carried between requests
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Messages in the order they were added
    #[serde(default)]
    pub history: Vec<Message>,
    /// State read and written by the tool path (e.g. `server`)
    #[serde(default)]
    pub tool_routing: Blob,
    /// State read and written by the model path (e.g. `max_tokens`)
    #[serde(default)]
    pub model_routing: Blob,
}

/// Why a session became inactive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Explicit,
    Expired,
    Evicted,
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Explicit => "explicit",
            CloseReason::Expired => "expired",
            CloseReason::Evicted => "evicted",
            CloseReason::Shutdown => "shutdown",
        }
    }
}

/// A user's conversation session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub active: bool,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    /// Tool servers attached to this session
    #[serde(default)]
    pub tool_servers: Vec<String>,
    /// Provider selected for this session, if any
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub context: SessionContext,
    #[serde(default)]
    pub metadata: Blob,
}

impl Session {
    pub fn new(user_id: &str, metadata: Blob, now: DateTime<Utc>) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            last_activity: now,
            active: true,
            closed_at: None,
            tool_servers: Vec::new(),
            provider: None,
            context: SessionContext::default(),
            metadata,
        }
    }

    /// Idle for at least `timeout` at `now`.
    pub fn is_expired(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        now - self.last_activity >= timeout
    }

    /// Active and not expired.
    pub fn is_visible(&self, timeout: Duration, now: DateTime<Utc>) -> bool {
        self.active && !self.is_expired(timeout, now)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    pub(crate) fn close(&mut self, now: DateTime<Utc>) {
        self.active = false;
        self.closed_at = Some(now);
    }

    /// Attach a tool server; attaching twice is a no-op.
    pub fn attach_server(&mut self, name: &str) {
        if !self.tool_servers.iter().any(|s| s == name) {
            self.tool_servers.push(name.to_string());
        }
    }

    pub fn detach_server(&mut self, name: &str) {
        self.tool_servers.retain(|s| s != name);
    }
}
