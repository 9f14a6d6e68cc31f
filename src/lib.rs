//! lexagent - Legal Research Agent
//!
//! Answers legal questions through a staged pipeline:
//! - Context analysis and strategy routing
//! - Concurrent semantic + keyword retrieval with relevance floors
//! - Sub-topic summarization and model reasoning with fallback models
//! - Mechanical citation numbering and confidence-gated retry
//! - Per-user research memory

pub mod agent;
pub mod config;
pub mod context_analyzer;
pub mod error;
pub mod formatter;
pub mod health;
pub mod http_search;
pub mod keywords;
pub mod llm;
pub mod logging;
pub mod memory;
pub mod prompt;
pub mod reasoning;
pub mod retrieval;
pub mod scoring;
pub mod selection;
pub mod server;
pub mod similarity;
pub mod strategy;
pub mod summarizer;
pub mod types;

pub use types::*;
pub use agent::{Collaborators, ResearchAgent, SharedResearchAgent};
pub use config::{AgentConfig, ConfigLoader};
pub use error::{AgentError, AgentResult, ModelError};
pub use http_search::HttpSimilarityStore;
pub use llm::{HttpLanguageModel, LanguageModel, ScriptedModel};
pub use memory::{HttpMemoryStore, InMemoryMemoryStore, MemoryStore};
pub use similarity::{InMemoryCorpus, MockSimilarityStore, SimilarityStore};

#[cfg(test)]
mod tests;
