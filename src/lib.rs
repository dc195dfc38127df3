//! Financial Research Assistant
//!
//! A streaming research pipeline that:
//! - Turns a natural-language question into a short research plan
//! - Routes each step to a market-data, news or web-search provider
//! - Degrades gracefully when a provider has no key, no data or fails
//! - Streams plan, progress and results to the client over SSE
//! - Synthesizes a final answer token by token
//!
//! PIPELINE:
//! QUERY → PLAN → EXECUTE (per step) → SUMMARIZE → DONE, then ANSWER

pub mod api;
pub mod config;
pub mod error;
pub mod executor;
pub mod format;
pub mod llm;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod planner;
pub mod providers;
pub mod sse;
pub mod summarizer;
pub mod ticker;

#[cfg(test)]
mod test_support;

pub use error::{ResearchError, Result};

// Re-export common types
pub use config::Config;
pub use models::*;
pub use orchestrator::ResearchOrchestrator;
