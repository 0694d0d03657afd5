//! Request classification
//!
//! A [`Classifier`] decides which [`Strategy`] handles a request. The
//! default [`RuleClassifier`] walks an ordered rule list and returns the
//! strategy of the first rule that matches:
//!
//! 1. explicit tool phrases ("list files", "read file", "run command")
//! 2. phrases asking for tool output to be interpreted ("analyze this log file")
//! 3. explicit model phrases ("explain", "how", "summarize")
//! 4. a configured tool keyword at the start of a word
//! 5. a configured model keyword at the start of a word
//!
//! Anything else goes to the model.

use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::RouterConfig;
use crate::error::Result;

/// How a request is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Call a tool server and format its result
    ToolOnly,
    /// Ask a language model
    ModelOnly,
    /// Call a tool, then ask a model to explain the result
    Hybrid,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::ToolOnly => "tool_only",
            Strategy::ModelOnly => "model_only",
            Strategy::Hybrid => "hybrid",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks a strategy for a request
pub trait Classifier: Send + Sync + fmt::Debug {
    fn classify(&self, text: &str) -> Strategy;
}

#[derive(Debug, Clone)]
enum Matcher {
    Pattern(Regex),
    /// Lowercase keywords matched at the start of a word
    Keywords(Vec<String>),
}

impl Matcher {
    fn matches(&self, lower: &str) -> bool {
        match self {
            Matcher::Pattern(re) => re.is_match(lower),
            Matcher::Keywords(keywords) => lower
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .any(|word| keywords.iter().any(|k| word.starts_with(k.as_str()))),
        }
    }
}

/// One matcher and the strategy it selects
#[derive(Debug, Clone)]
pub struct Rule {
    label: String,
    matcher: Matcher,
    strategy: Strategy,
}

impl Rule {
    /// Rule matching a case-insensitive regular expression.
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` is not a valid regex.
    pub fn pattern(label: &str, pattern: &str, strategy: Strategy) -> Result<Self> {
        Ok(Self {
            label: label.to_string(),
            matcher: Matcher::Pattern(Regex::new(&format!("(?i){}", pattern))?),
            strategy,
        })
    }

    /// Rule matching any word that starts with one of `keywords`.
    pub fn keywords(label: &str, keywords: &[String], strategy: Strategy) -> Self {
        let keywords = keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        Self {
            label: label.to_string(),
            matcher: Matcher::Keywords(keywords),
            strategy,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

const TOOL_PATTERNS: &[&str] = &[
    r"\b(list|show|get)\s+(all\s+)?(files?|directories?|processes?)\b",
    r"\b(read|open|view)\s+(the\s+)?(file|document)\b",
    r"\b(create|make|new)\s+(file|directory|folder)\b",
    r"\b(delete|remove|rm)\s+(file|directory)\b",
    r"\b(run|execute|start)\s+(command|program|script)\b",
    r"\b(search|find)\s+(in|for)\b",
    r"\b(query|select)\s+(database|db)\b",
];

const HYBRID_PATTERNS: &[&str] = &[
    r"\b(analy[sz]e|examine|review|inspect)\s+((this|the|that|my)\s+)?(\w+\s+)?(files?|documents?|data|logs?|output)\b",
    r"\b(explain|describe)\s+(what|how)\s+((this|the)\s+)?(files?|process|system)\b",
    r"\b(help me understand|show me)\s+((this|the)\s+)?(files?|data|output)\b",
];

const MODEL_PATTERNS: &[&str] = &[
    r"\b(explain|describe|tell me about)\b",
    r"\b(how|what|why|when|where|who)\b",
    r"\b(analy[sz]e|summari[sz]e|review)\b",
    r"\b(translate|convert)\b",
    r"\b(generate|create|write)\s+(a\s+)?(text|story|poem|essay)\b",
    r"\b(help|assist|guide)\b",
];

/// Ordered first-match-wins rule list
///
/// # Examples
///
/// ```
/// use parley::config::RouterConfig;
/// use parley::routing::{Classifier, RuleClassifier, Strategy};
///
/// let classifier = RuleClassifier::new(&RouterConfig::default()).unwrap();
/// assert_eq!(classifier.classify("list files in src"), Strategy::ToolOnly);
/// assert_eq!(classifier.classify("explain how TCP works"), Strategy::ModelOnly);
/// ```
#[derive(Debug, Clone)]
pub struct RuleClassifier {
    rules: Vec<Rule>,
    fallback: Strategy,
}

impl RuleClassifier {
    /// Built-in phrase rules followed by the configured keyword lists.
    pub fn new(config: &RouterConfig) -> Result<Self> {
        let mut rules = Vec::new();
        for (group, patterns, strategy) in [
            ("tool_phrase", TOOL_PATTERNS, Strategy::ToolOnly),
            ("hybrid_phrase", HYBRID_PATTERNS, Strategy::Hybrid),
            ("model_phrase", MODEL_PATTERNS, Strategy::ModelOnly),
        ] {
            for pattern in patterns {
                rules.push(Rule::pattern(group, pattern, strategy)?);
            }
        }
        rules.push(Rule::keywords(
            "tool_keyword",
            &config.mcp_keywords,
            Strategy::ToolOnly,
        ));
        rules.push(Rule::keywords(
            "model_keyword",
            &config.llm_keywords,
            Strategy::ModelOnly,
        ));
        Ok(Self::from_rules(rules, Strategy::ModelOnly))
    }

    pub fn from_rules(rules: Vec<Rule>, fallback: Strategy) -> Self {
        Self { rules, fallback }
    }

    /// Strategy plus the label of the rule that chose it (`default` if none).
    pub fn explain(&self, text: &str) -> (Strategy, &str) {
        let lower = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matcher.matches(&lower))
            .map_or((self.fallback, "default"), |rule| {
                (rule.strategy, rule.label.as_str())
            })
    }
}

impl Classifier for RuleClassifier {
    fn classify(&self, text: &str) -> Strategy {
        let (strategy, rule) = self.explain(text);
        tracing::debug!(strategy = strategy.as_str(), rule, "classified request");
        strategy
    }
}
