//! Request routing
//!
//! Turns an incoming message into a [`Reply`]:
//!
//! - [`context`] builds the per-request [`Context`] from the session
//! - [`classifier`] picks a [`Strategy`]
//! - [`extract`] derives the tool call for tool strategies
//! - [`router`] drives the registries
//! - [`reply`] defines the result and formats tool output

pub mod classifier;
pub mod context;
pub mod extract;
pub mod reply;
pub mod router;

pub use classifier::{Classifier, Rule, RuleClassifier, Strategy};
pub use context::{
    Complexity, Context, ContextAnalysis, ContextBuilder, ContextSummary, ContextUpdate, Sentiment,
};
pub use extract::{ToolExtractor, ToolRequest};
pub use reply::{format_tool_result, Reply, ReplyStatus};
pub use router::StrategyRouter;
