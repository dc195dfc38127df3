//! Core data models for the research pipeline

use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_TITLE_CHARS: usize = 50;
pub const MAX_DESCRIPTION_CHARS: usize = 200;

//
// ================= Enums =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Done,
    Failed,
}

/// Which provider (or provider mix) produced an execution result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTag {
    FmpQuote,
    FmpQuoteLight,
    FmpChart,
    FmpMovers,
    PolygonNews,
    BraveNews,
    BraveWeb,
    Combined,
}

impl ProviderTag {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderTag::FmpQuote => "fmp_quote",
            ProviderTag::FmpQuoteLight => "fmp_quote_light",
            ProviderTag::FmpChart => "fmp_chart",
            ProviderTag::FmpMovers => "fmp_movers",
            ProviderTag::PolygonNews => "polygon_news",
            ProviderTag::BraveNews => "brave_news",
            ProviderTag::BraveWeb => "brave_web",
            ProviderTag::Combined => "combined",
        }
    }

    pub fn is_news(self) -> bool {
        matches!(self, ProviderTag::PolygonNews | ProviderTag::BraveNews)
    }
}

impl fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Developer,
}

//
// ================= Plan =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_message: Option<String>,
    /// Seconds spent executing, set once the step is terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_time: Option<f64>,
}

impl PlanStep {
    /// Build a pending step, truncating title and description to their limits
    pub fn new(title: impl AsRef<str>, description: impl AsRef<str>) -> Self {
        Self {
            title: truncate_chars(title.as_ref().trim(), MAX_TITLE_CHARS),
            description: truncate_chars(description.as_ref().trim(), MAX_DESCRIPTION_CHARS),
            status: StepStatus::Pending,
            summary: None,
            progress_message: None,
            elapsed_time: None,
        }
    }

    /// Title and description joined, the text the router classifies
    pub fn text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

//
// ================= Execution =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub step: PlanStep,
    pub provider: ProviderTag,
    /// Opaque provider payload; `Null` only when `error` is set
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn success(
        step: PlanStep,
        provider: ProviderTag,
        data: serde_json::Value,
        summary: String,
    ) -> Self {
        Self {
            step,
            provider,
            data,
            summary: Some(summary),
            error: None,
        }
    }

    pub fn failure(step: PlanStep, provider: ProviderTag, error: String) -> Self {
        Self {
            step,
            provider,
            data: serde_json::Value::Null,
            summary: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

//
// ================= Conversation =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }
}

/// Keep only the most recent `limit` messages of a conversation
pub fn recent_history(history: &[ChatMessage], limit: usize) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(limit);
    history[start..].to_vec()
}

/// Truncate on a char boundary
pub fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((idx, _)) => input[..idx].to_string(),
        None => input.to_string(),
    }
}
