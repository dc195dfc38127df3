//! Model-backed planner
//!
//! Asks the completion model for a JSON array of steps; anything unusable
//! falls back to the rule-based planner.

use super::{parse_plan, Planner, RuleBasedPlanner};
use crate::llm::{CompletionClient, CompletionOptions};
use crate::models::{recent_history, ChatMessage, ExecutionResult, PlanStep};
use crate::observability::{ObservedEvent, Observer};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

const PLAN_TEMPERATURE: f32 = 0.7;
const PLAN_MAX_TOKENS: u32 = 1000;
const HISTORY_LIMIT: usize = 10;
const COMPLETED_SUMMARY_CHARS: usize = 300;

pub struct LlmPlanner {
    client: Arc<dyn CompletionClient>,
    fallback: RuleBasedPlanner,
    observer: Arc<dyn Observer>,
}

impl LlmPlanner {
    pub fn new(client: Arc<dyn CompletionClient>, observer: Arc<dyn Observer>) -> Self {
        Self {
            client,
            fallback: RuleBasedPlanner::new(),
            observer,
        }
    }

    fn messages(system: String, history: &[ChatMessage], user: String) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(HISTORY_LIMIT + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(recent_history(history, HISTORY_LIMIT));
        messages.push(ChatMessage::user(user));
        messages
    }

    fn options() -> CompletionOptions {
        CompletionOptions::new(PLAN_TEMPERATURE, PLAN_MAX_TOKENS).json()
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn generate_plan(
        &self,
        query: &str,
        history: &[ChatMessage],
        max_steps: usize,
    ) -> Vec<PlanStep> {
        let messages = Self::messages(plan_prompt(max_steps), history, query.to_string());

        let parsed = self
            .client
            .complete(&messages, &Self::options())
            .await
            .and_then(|raw| parse_plan(&raw, max_steps));

        match parsed {
            Ok(steps) => {
                info!(steps = steps.len(), "Plan generated by model");
                self.observer.record(ObservedEvent::new(
                    "planner",
                    "plan_generated",
                    json!({ "source": "llm", "steps": steps.len() }),
                ));
                steps
            }
            Err(e) => {
                warn!("Planning failed, using rule-based plan: {}", e);
                let steps = self.fallback.plan(query, max_steps);
                self.observer.record(ObservedEvent::new(
                    "planner",
                    "plan_fallback",
                    json!({ "reason": e.to_string(), "steps": steps.len() }),
                ));
                steps
            }
        }
    }

    async fn refine_plan(
        &self,
        query: &str,
        completed: &[ExecutionResult],
        history: &[ChatMessage],
        max_steps: usize,
    ) -> Vec<PlanStep> {
        let user = format!(
            "Question: {}\n\nCompleted research:\n{}",
            query,
            describe_completed(completed)
        );
        let messages = Self::messages(refine_prompt(max_steps), history, user);

        let refined = self
            .client
            .complete(&messages, &Self::options())
            .await
            .and_then(|raw| parse_plan(&raw, max_steps));

        match refined {
            Ok(steps) => {
                self.observer.record(ObservedEvent::new(
                    "planner",
                    "plan_refined",
                    json!({ "steps": steps.len() }),
                ));
                steps
            }
            Err(e) => {
                warn!("Plan refinement failed, treating research as complete: {}", e);
                Vec::new()
            }
        }
    }
}

fn describe_completed(completed: &[ExecutionResult]) -> String {
    if completed.is_empty() {
        return "(nothing yet)".to_string();
    }

    completed
        .iter()
        .enumerate()
        .map(|(i, result)| {
            let outcome = match (&result.error, &result.summary) {
                (Some(err), _) => format!("FAILED: {}", err),
                (None, Some(summary)) => summary.chars().take(COMPLETED_SUMMARY_CHARS).collect(),
                (None, None) => "completed".to_string(),
            };
            format!(
                "{}. {} [{}] - {}",
                i + 1,
                result.step.title,
                result.provider,
                outcome
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn plan_prompt(max_steps: usize) -> String {
    format!(
        r#"You are a financial research planner. Break the user's question into a short research plan.

Guidelines:
- Users speak market lingo: tickers ($NVDA, AAPL), "calls", "puts", "ATH", "earnings beat", "guidance", "bagholder". Interpret them correctly.
- Write tickers in UPPERCASE inside step titles and descriptions.
- Each step is one concrete data lookup: a stock quote, an intraday chart, ticker news, general market news, market movers, or a web search about a company.
- Use at most {max_steps} steps. Fewer is better when the question is simple.
- If the question needs no research (greetings, follow-ups already answered), return {{"steps": []}}.

Format: respond with ONLY a JSON object, no prose, no markdown:
{{"steps": [{{"title": "<= 50 characters", "description": "<= 200 characters"}}]}}"#
    )
}

fn refine_prompt(max_steps: usize) -> String {
    format!(
        r#"You are a financial research planner reviewing research already performed for the user's question.

Decide whether more data is needed to answer it well.
- If the completed research is sufficient, return {{"steps": []}}.
- Otherwise return only the ADDITIONAL steps needed, at most {max_steps}. Never repeat a completed step.
- Each step is one concrete data lookup: a stock quote, an intraday chart, ticker news, general market news, market movers, or a web search.

Format: respond with ONLY a JSON object, no prose, no markdown:
{{"steps": [{{"title": "<= 50 characters", "description": "<= 200 characters"}}]}}"#
    )
}
