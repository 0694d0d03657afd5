//! Per-request context assembly
//!
//! [`ContextBuilder`] turns a session plus an incoming request into a
//! [`Context`]: a snapshot of the session's history and routing state with
//! the new user message appended. Everything the builder writes back goes
//! through [`SessionStore::update`].

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::{ParleyError, Result};
use crate::providers::Role;
use crate::session::{Blob, Message, RequestKind, SessionStore, SessionUpdate};

/// Snapshot of one request and the session state it builds on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub session_id: String,
    pub user_id: String,
    /// Request text as submitted
    pub text: String,
    pub kind: RequestKind,
    /// Fresh for every request
    pub correlation_id: String,
    /// Stored history followed by the current user message
    pub history: Vec<Message>,
    pub tool_routing: Blob,
    pub model_routing: Blob,
    pub metadata: Blob,
    /// Provider selected on the session, if any
    pub provider: Option<String>,
    pub created_at: DateTime<Utc>,
    /// History entries from this index on are not yet stored on the session
    #[serde(skip)]
    unsaved_from: usize,
}

impl Context {
    /// Id of the user message this request added.
    pub fn current_message_id(&self) -> Option<&str> {
        self.history
            .get(self.unsaved_from)
            .filter(|m| m.role == Role::User)
            .map(|m| m.id.as_str())
    }

    /// History preceding the current user message.
    pub fn prior_history(&self) -> &[Message] {
        let end = self.unsaved_from.min(self.history.len());
        &self.history[..end]
    }

    /// Metadata value as a string, if present and a string.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn summary(&self) -> ContextSummary {
        ContextSummary {
            session_id: self.session_id.clone(),
            user_id: self.user_id.clone(),
            kind: self.kind,
            correlation_id: self.correlation_id.clone(),
            message_count: self.history.len(),
            tool_routing_keys: self.tool_routing.keys().cloned().collect(),
            model_routing_keys: self.model_routing.keys().cloned().collect(),
            metadata_keys: self.metadata.keys().cloned().collect(),
        }
    }

    /// Run the request heuristics over this context.
    pub fn analyze(&self) -> ContextAnalysis {
        ContextAnalysis {
            keywords: extract_keywords(&self.text, &self.history),
            sentiment: sentiment(&self.text),
            complexity: complexity(&self.text),
            use_tools: should_use_tools(&self.text, self.kind),
            suggested_servers: suggested_servers(&self.text),
        }
    }
}

/// Compact description of a context for logs and events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub session_id: String,
    pub user_id: String,
    pub kind: RequestKind,
    pub correlation_id: String,
    pub message_count: usize,
    pub tool_routing_keys: Vec<String>,
    pub model_routing_keys: Vec<String>,
    pub metadata_keys: Vec<String>,
}

/// Partial context change applied by [`ContextBuilder::update`]
#[derive(Debug, Clone, Default)]
pub struct ContextUpdate {
    pub tool_routing: Option<Blob>,
    pub model_routing: Option<Blob>,
    pub metadata: Option<Blob>,
}

/// Builds contexts from sessions and writes their changes back
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    sessions: Arc<SessionStore>,
}

impl ContextBuilder {
    pub fn new(sessions: Arc<SessionStore>) -> Self {
        Self { sessions }
    }

    /// Build the context for a new request on `session_id`.
    ///
    /// The user message is part of the returned history immediately and is
    /// stored on the session by the next [`ContextBuilder::add_message`] or
    /// [`ContextBuilder::update`].
    ///
    /// # Errors
    ///
    /// `NotFound` if the session is absent, closed or expired.
    pub async fn build(
        &self,
        session_id: &str,
        text: &str,
        kind: RequestKind,
        metadata: Blob,
    ) -> Result<Context> {
        let started = Utc::now();
        let session = self.sessions.get(session_id).await.ok_or_else(|| {
            ParleyError::NotFound(format!("session `{}` not found or expired", session_id))
        })?;

        let mut history = session.context.history;
        let unsaved_from = history.len();
        history.push(Message::user(text).with_metadata(metadata.clone()));

        let mut context_metadata = metadata;
        context_metadata.insert(
            "session_created_at".into(),
            json!(session.created_at.to_rfc3339()),
        );
        context_metadata.insert(
            "session_last_activity".into(),
            json!(session.last_activity.to_rfc3339()),
        );
        context_metadata.insert("session_tool_servers".into(), json!(session.tool_servers));
        context_metadata.insert("session_provider".into(), json!(session.provider));
        context_metadata.insert("processing_start_time".into(), json!(started.to_rfc3339()));

        let context = Context {
            session_id: session.session_id,
            user_id: session.user_id,
            text: text.to_string(),
            kind,
            correlation_id: Uuid::new_v4().to_string(),
            history,
            tool_routing: session.context.tool_routing,
            model_routing: session.context.model_routing,
            metadata: context_metadata,
            provider: session.provider,
            created_at: started,
            unsaved_from,
        };

        tracing::debug!(
            session_id,
            correlation_id = %context.correlation_id,
            history = context.history.len(),
            "built context"
        );
        Ok(context)
    }

    /// Append `message` to the context and persist every unsaved message.
    pub async fn add_message(&self, context: &mut Context, message: Message) -> Result<()> {
        context.history.push(message);
        self.persist(context, ContextUpdate::default()).await
    }

    /// Merge routing and metadata changes into the context and the session.
    pub async fn update(&self, context: &mut Context, update: ContextUpdate) -> Result<()> {
        if let Some(blob) = &update.tool_routing {
            context.tool_routing.extend(blob.clone());
        }
        if let Some(blob) = &update.model_routing {
            context.model_routing.extend(blob.clone());
        }
        if let Some(blob) = &update.metadata {
            context.metadata.extend(blob.clone());
        }
        self.persist(context, update).await
    }

    async fn persist(&self, context: &mut Context, update: ContextUpdate) -> Result<()> {
        let start = context.unsaved_from.min(context.history.len());
        let append = context.history[start..].to_vec();
        self.sessions
            .update(
                &context.session_id,
                SessionUpdate {
                    tool_routing: update.tool_routing,
                    model_routing: update.model_routing,
                    metadata: update.metadata,
                    history: None,
                    append,
                    provider: None,
                },
            )
            .await?;
        context.unsaved_from = context.history.len();
        Ok(())
    }
}

/// Coarse tone of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// Result of the request heuristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextAnalysis {
    pub keywords: Vec<String>,
    pub sentiment: Sentiment,
    pub complexity: Complexity,
    pub use_tools: bool,
    pub suggested_servers: Vec<String>,
}

const MAX_KEYWORDS: usize = 10;
const KEYWORD_HISTORY: usize = 5;

const STOPWORDS: &[&str] = &[
    "this", "that", "with", "have", "will", "from", "they", "know", "want", "been", "good",
    "much", "some", "time", "very", "when", "come", "just", "into", "than", "more", "other",
    "about", "many", "then", "them", "these", "people", "only", "would", "could", "there",
    "their", "what", "said", "each", "which", "make", "like", "first", "call", "find", "long",
    "down", "made", "part",
];

const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "excellent", "amazing", "wonderful", "fantastic", "awesome", "love", "like",
    "happy", "pleased", "satisfied", "perfect", "best", "nice", "beautiful", "brilliant",
    "outstanding", "superb", "terrific",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad", "terrible", "awful", "horrible", "disgusting", "hate", "dislike", "angry", "sad",
    "disappointed", "frustrated", "worst", "ugly", "stupid", "dumb", "useless", "worthless",
    "annoying", "irritating", "boring",
];

const TOOL_HINT_WORDS: &[&str] = &[
    "file", "read", "write", "list", "directory", "folder", "database", "query", "search",
    "find", "execute", "run", "command", "system", "process", "server", "api", "http",
    "request", "response", "mcp",
];

const SERVER_HINTS: &[(&str, &[&str])] = &[
    ("file_system", &["file", "read", "write", "list", "directory", "folder"]),
    ("database", &["database", "query", "sql", "table", "data"]),
    ("web_search", &["search", "find", "web", "internet", "google"]),
    ("system", &["system", "process", "command", "execute", "run"]),
];

/// Words longer than three letters, minus stopwords, from the request and
/// the last few history messages. First occurrence order, at most ten.
pub fn extract_keywords(text: &str, history: &[Message]) -> Vec<String> {
    let recent = history.iter().rev().take(KEYWORD_HISTORY).rev();
    let sources = std::iter::once(text).chain(recent.map(|m| m.content.as_str()));

    let mut seen = HashSet::new();
    let mut keywords = Vec::new();
    for word in sources.flat_map(str::split_whitespace) {
        let word = word.to_lowercase();
        if word.chars().count() <= 3 || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if seen.insert(word.clone()) {
            keywords.push(word);
            if keywords.len() == MAX_KEYWORDS {
                break;
            }
        }
    }
    keywords
}

pub fn sentiment(text: &str) -> Sentiment {
    let lower = text.to_lowercase();
    let positive = POSITIVE_WORDS.iter().filter(|w| lower.contains(*w)).count();
    let negative = NEGATIVE_WORDS.iter().filter(|w| lower.contains(*w)).count();
    match positive.cmp(&negative) {
        std::cmp::Ordering::Greater => Sentiment::Positive,
        std::cmp::Ordering::Less => Sentiment::Negative,
        std::cmp::Ordering::Equal => Sentiment::Neutral,
    }
}

/// `high` above 50 words or 30 unique words, `medium` above 20 or 15.
pub fn complexity(text: &str) -> Complexity {
    let words = text.split_whitespace().count();
    let unique = text
        .to_lowercase()
        .split_whitespace()
        .collect::<HashSet<_>>()
        .len();
    if words > 50 || unique > 30 {
        Complexity::High
    } else if words > 20 || unique > 15 {
        Complexity::Medium
    } else {
        Complexity::Low
    }
}

pub fn should_use_tools(text: &str, kind: RequestKind) -> bool {
    if kind == RequestKind::McpRequest {
        return true;
    }
    let lower = text.to_lowercase();
    TOOL_HINT_WORDS.iter().any(|w| lower.contains(w))
}

/// Names of server families whose keywords appear in the request.
pub fn suggested_servers(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    SERVER_HINTS
        .iter()
        .filter(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(name, _)| name.to_string())
        .collect()
}
