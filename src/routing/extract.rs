//! Tool request extraction
//!
//! Maps free text onto a tool name and argument object with a few pattern
//! rules. Requests that match nothing become `list_files` on `.`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;

pub const LIST_FILES: &str = "list_files";
pub const READ_FILE: &str = "read_file";
pub const SEARCH_FILES: &str = "search_files";

/// Tool name plus `tools/call` arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    pub arguments: Value,
}

impl ToolRequest {
    pub fn new(tool: &str, arguments: Value) -> Self {
        Self {
            tool: tool.to_string(),
            arguments,
        }
    }
}

/// Compiled extraction rules
#[derive(Debug, Clone)]
pub struct ToolExtractor {
    list_path: Regex,
    read_target: Regex,
    search_terms: Vec<Regex>,
}

impl ToolExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            list_path: Regex::new(r"\bin\s+(?:the\s+)?(\S+)")?,
            read_target: Regex::new(r"\bread\s+(?:the\s+)?(?:file\s+)?(\S+)")?,
            search_terms: [
                r"\bsearch\s+for\s+(\S+)",
                r"\bsearch\s+(\S+)",
                r"\bfind\s+files\s+containing\s+(\S+)",
                r"\bfind\s+(\S+)\s+files",
            ]
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<_, _>>()?,
        })
    }

    /// Derive the tool call for `text`.
    ///
    /// # Examples
    ///
    /// ```
    /// use parley::routing::ToolExtractor;
    ///
    /// let extractor = ToolExtractor::new().unwrap();
    /// let request = extractor.extract("list files in the current directory");
    /// assert_eq!(request.tool, "list_files");
    /// assert_eq!(request.arguments["path"], ".");
    /// ```
    pub fn extract(&self, text: &str) -> ToolRequest {
        let lower = text.to_lowercase();

        if lower.contains("list") && (lower.contains("file") || lower.contains("directory")) {
            let path = self
                .list_path
                .captures(&lower)
                .and_then(|c| c.get(1))
                .map(|m| trim_path(m.as_str()))
                .map(|p| match p {
                    "current" | "this" | "here" => ".",
                    other => other,
                })
                .unwrap_or(".");
            return ToolRequest::new(LIST_FILES, json!({ "path": path }));
        }

        if lower.contains("read") && lower.contains("file") {
            let mut arguments = json!({ "path": "." });
            if let Some(target) = self.read_target.captures(&lower).and_then(|c| c.get(1)) {
                arguments["path"] = json!(trim_path(target.as_str()));
            }
            return ToolRequest::new(READ_FILE, arguments);
        }

        if lower.contains("search") {
            let term = self
                .search_terms
                .iter()
                .find_map(|re| re.captures(&lower).and_then(|c| c.get(1)))
                .map(|m| trim_path(m.as_str()));
            let arguments = match term {
                Some(term) => json!({ "pattern": glob_for(term), "recursive": true }),
                None => json!({ "path": "." }),
            };
            return ToolRequest::new(SEARCH_FILES, arguments);
        }

        ToolRequest::new(LIST_FILES, json!({ "path": "." }))
    }
}

fn trim_path(raw: &str) -> &str {
    raw.trim_end_matches(|c: char| matches!(c, '.' | ',' | '?' | '!' | ';' | ':'))
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
}

fn glob_for(term: &str) -> String {
    if term.contains("test") {
        "*test*".to_string()
    } else if term.contains("py") {
        "*.py".to_string()
    } else {
        format!("*{}*", term)
    }
}
