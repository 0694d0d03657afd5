//! Replies returned to callers
//!
//! A [`Reply`] carries the user-facing text plus metadata recording which
//! strategy ran and which tool or provider answered.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::session::Blob;

/// Number of files listed before the remainder is summarized.
pub const MAX_LISTED_FILES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplyStatus {
    Success,
    /// The request was only partly served; the text explains what failed
    Partial,
    Error,
}

impl ReplyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplyStatus::Success => "success",
            ReplyStatus::Partial => "partial",
            ReplyStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: String,
    pub text: String,
    pub status: ReplyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: Blob,
    pub correlation_id: String,
    /// Session the reply belongs to
    #[serde(default)]
    pub session_id: String,
    /// Wall time spent processing the request
    #[serde(default)]
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl Reply {
    fn new(text: String, status: ReplyStatus, error: Option<String>, correlation_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text,
            status,
            error,
            metadata: Blob::new(),
            correlation_id: correlation_id.to_string(),
            session_id: String::new(),
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn success(text: impl Into<String>, correlation_id: &str) -> Self {
        Self::new(text.into(), ReplyStatus::Success, None, correlation_id)
    }

    /// Soft failure offering to continue with a general answer.
    pub fn partial(error: &str, correlation_id: &str) -> Self {
        let text = format!(
            "I tried to process your request but encountered an issue: {}. \
             Let me try to help you with a general response.",
            error
        );
        let mut reply = Self::new(text, ReplyStatus::Partial, Some(error.to_string()), correlation_id);
        reply.metadata.insert("fallback".into(), json!(true));
        reply
    }

    pub fn error(error: &str, correlation_id: &str) -> Self {
        let text = format!("I'm sorry, but I couldn't process your request: {}", error);
        Self::new(text, ReplyStatus::Error, Some(error.to_string()), correlation_id)
    }

    pub fn with_meta(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ReplyStatus::Success
    }

    pub fn strategy(&self) -> Option<&str> {
        self.metadata.get("processing_strategy").and_then(Value::as_str)
    }

    pub fn tool_used(&self) -> Option<&str> {
        self.metadata.get("tool_used").and_then(Value::as_str)
    }
}

/// Render a `tools/call` result as user-facing text.
///
/// # Examples
///
/// ```
/// use parley::routing::format_tool_result;
///
/// let text = format_tool_result(&serde_json::json!({"files": []}));
/// assert_eq!(text, "No files found.");
/// ```
pub fn format_tool_result(result: &Value) -> String {
    let Value::Object(map) = result else {
        return value_text(result);
    };

    if let Some(content) = map.get("content") {
        return match content {
            Value::Array(items) => items
                .iter()
                .map(|item| match item.get("text").and_then(Value::as_str) {
                    Some(text) => text.to_string(),
                    None => value_text(item),
                })
                .collect::<Vec<_>>()
                .join("\n"),
            other => value_text(other),
        };
    }

    if let Some(files) = map.get("files") {
        return match files {
            Value::Array(files) => format_files(files),
            other => value_text(other),
        };
    }

    if let Some(data) = map.get("data") {
        return value_text(data);
    }

    result.to_string()
}

fn format_files(files: &[Value]) -> String {
    if files.is_empty() {
        return "No files found.".to_string();
    }

    let lines: Vec<String> = files
        .iter()
        .take(MAX_LISTED_FILES)
        .map(|file| {
            let name = file
                .get("name")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| value_text(file));
            let kind = file.get("type").and_then(Value::as_str).unwrap_or("unknown");
            format!("- {} ({})", name, kind)
        })
        .collect();

    if files.len() <= MAX_LISTED_FILES {
        format!("Found {} files:\n{}", files.len(), lines.join("\n"))
    } else {
        format!(
            "Found {} files. Showing first {}:\n{}\n... and {} more files",
            files.len(),
            MAX_LISTED_FILES,
            lines.join("\n"),
            files.len() - MAX_LISTED_FILES
        )
    }
}

/// Strings as is, everything else as compact JSON.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
