//! Planner trait and implementations
//!
//! The planner decomposes a research question into a short ordered list of
//! steps. Planning never fails upward: a model failure or malformed output
//! degrades to the rule-based plan.

use crate::error::ResearchError;
use crate::models::{ChatMessage, ExecutionResult, PlanStep};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

pub mod fallback;
pub mod llm;

pub use fallback::RuleBasedPlanner;
pub use llm::LlmPlanner;

/// Trait for plan generation
#[async_trait]
pub trait Planner: Send + Sync {
    /// Initial plan for a question; may be empty when no research is needed
    async fn generate_plan(
        &self,
        query: &str,
        history: &[ChatMessage],
        max_steps: usize,
    ) -> Vec<PlanStep>;

    /// Follow-up steps given what has already run; empty means research is complete
    async fn refine_plan(
        &self,
        query: &str,
        completed: &[ExecutionResult],
        history: &[ChatMessage],
        max_steps: usize,
    ) -> Vec<PlanStep>;
}

/// Loosely-typed step as the model wrote it
#[derive(Debug, Default, Deserialize)]
struct RawStep {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl RawStep {
    fn validate(self) -> Option<PlanStep> {
        let title = self.title.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
        let description = self
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())?;
        Some(PlanStep::new(title, description))
    }
}

/// Strip a ```json ... ``` (or bare ```) fence if the model wrapped its output
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

/// Parse a model response into validated steps.
///
/// Accepts a bare array or an object wrapping it (JSON mode forces an
/// object), under `steps` or any other single array-valued key. Entries missing a title or description
/// are dropped. A non-empty array with no valid entry is malformed.
pub fn parse_plan(raw: &str, max_steps: usize) -> Result<Vec<PlanStep>> {
    let value: Value = serde_json::from_str(strip_code_fence(raw))
        .map_err(|e| ResearchError::PlanningError(format!("plan is not JSON: {}", e)))?;

    let entries = match value {
        Value::Array(entries) => entries,
        Value::Object(map) => wrapped_steps(map)?,
        other => {
            return Err(ResearchError::PlanningError(format!(
                "plan must be an array, got {}",
                json_kind(&other)
            )))
        }
    };

    if entries.is_empty() {
        return Ok(Vec::new());
    }

    let raw_count = entries.len();
    let steps: Vec<PlanStep> = entries
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<RawStep>(entry).ok())
        .filter_map(RawStep::validate)
        .take(max_steps)
        .collect();

    if steps.is_empty() {
        return Err(ResearchError::PlanningError(format!(
            "none of the {} planned steps were valid",
            raw_count
        )));
    }

    Ok(steps)
}

/// Steps inside an object: the `steps` key, or else its only array-valued field
fn wrapped_steps(mut map: Map<String, Value>) -> Result<Vec<Value>> {
    if let Some(Value::Array(entries)) = map.remove("steps") {
        return Ok(entries);
    }

    let mut arrays = map.into_iter().filter_map(|(_, v)| match v {
        Value::Array(entries) => Some(entries),
        _ => None,
    });
    match (arrays.next(), arrays.next()) {
        (Some(entries), None) => Ok(entries),
        _ => Err(ResearchError::PlanningError(
            "plan object has no single steps array".to_string(),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
