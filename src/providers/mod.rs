//! Provider module for Parley
//!
//! This module contains the language-model provider abstraction, the
//! OpenAI-compatible implementation, and the registry that dispatches
//! generation requests across providers with fallback.

pub mod base;
pub mod openai;
pub mod registry;

pub use base::{
    ChatTurn, Completion, GenerationOptions, ProviderClient, ProviderStats, Role, TokenUsage,
};
pub use openai::OpenAiProvider;
pub use registry::{
    GenerationResult, ProviderConstructor, ProviderFactory, ProviderRegistry,
    ProviderRegistryStats,
};
