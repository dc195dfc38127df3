//! Result summarization and final-answer synthesis
//!
//! Short summaries degrade to plain text when the model fails. The final
//! answer stream does not: its errors reach the caller.

use crate::llm::{CompletionClient, CompletionOptions, TextStream};
use crate::models::{recent_history, truncate_chars, ChatMessage, ExecutionResult};
use crate::observability::{ObservedEvent, Observer};
use crate::Result;
use chrono::Utc;
use serde_json::json;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{info, warn};

pub mod context;

pub use context::build_context;

/// Existing summaries inside this length band are kept as-is
const SANE_SUMMARY_CHARS: RangeInclusive<usize> = 20..=200;
const DATA_CHAR_BUDGET: usize = 1500;
const COMBINED_DATA_CHARS: usize = 400;
const HISTORY_LIMIT: usize = 10;
const NO_RESULTS: &str = "No research steps were executed, so there is nothing to summarize.";

pub struct Summarizer {
    client: Arc<dyn CompletionClient>,
    observer: Arc<dyn Observer>,
}

impl Summarizer {
    pub fn new(client: Arc<dyn CompletionClient>, observer: Arc<dyn Observer>) -> Self {
        Self { client, observer }
    }

    /// One-step summary, at most ~50 words
    pub async fn summarize_result(&self, result: &ExecutionResult, question: &str) -> String {
        if let Some(error) = &result.error {
            return format!("{} failed: {}", result.step.title, error);
        }

        if let Some(existing) = &result.summary {
            if SANE_SUMMARY_CHARS.contains(&existing.chars().count()) {
                return existing.clone();
            }
        }

        let prompt = format!(
            "Question: {}\nStep: {} - {}\nExisting summary: {}\nData: {}\n\n\
             Summarize what this data says in at most 50 words. Be neutral and factual, keep the key numbers.",
            question,
            result.step.title,
            result.step.description,
            result.summary.as_deref().unwrap_or("(none)"),
            truncate_chars(&result.data.to_string(), DATA_CHAR_BUDGET),
        );
        let messages = vec![
            ChatMessage::system("You summarize financial research data concisely and neutrally."),
            ChatMessage::user(prompt),
        ];

        match self
            .client
            .complete(&messages, &CompletionOptions::new(0.3, 150))
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => self.fallback_single(result, "empty model response"),
            Err(e) => self.fallback_single(result, &e.to_string()),
        }
    }

    /// Overall synthesis of every step; never fails
    pub async fn summarize_results(&self, results: &[ExecutionResult], question: &str) -> String {
        if results.is_empty() {
            return NO_RESULTS.to_string();
        }

        let findings = results
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. {}: {}", i + 1, r.step.title, step_text(r)))
            .collect::<Vec<_>>()
            .join("\n");

        let messages = vec![
            ChatMessage::system(
                "You write a short neutral overview (2-4 sentences) of financial research findings. \
                 Mention failed steps briefly. Do not give investment advice.",
            ),
            ChatMessage::user(format!("Question: {}\n\nFindings:\n{}", question, findings)),
        ];

        match self
            .client
            .complete(&messages, &CompletionOptions::new(0.3, 300))
            .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            outcome => {
                let reason = match outcome {
                    Err(e) => e.to_string(),
                    Ok(_) => "empty model response".to_string(),
                };
                warn!("Combined summary fell back to joined step summaries: {}", reason);
                self.observer.record(ObservedEvent::new(
                    "summarizer",
                    "summary_fallback",
                    json!({ "scope": "combined", "reason": reason }),
                ));
                naive_join(results)
            }
        }
    }

    /// Stream the final narrative answer
    pub async fn generate_final_answer(
        &self,
        question: &str,
        results: &[ExecutionResult],
        history: &[ChatMessage],
    ) -> Result<TextStream> {
        let context = build_context(results, Utc::now());

        let mut messages = Vec::with_capacity(HISTORY_LIMIT + 2);
        messages.push(ChatMessage::system(ANSWER_PROMPT));
        messages.extend(recent_history(history, HISTORY_LIMIT));
        messages.push(ChatMessage::user(format!(
            "Question: {}\n\nResearch data:\n{}",
            question, context
        )));

        info!(
            results = results.len(),
            context_chars = context.len(),
            "Generating final answer"
        );
        self.observer.record(ObservedEvent::new(
            "summarizer",
            "answer_started",
            json!({ "results": results.len(), "contextChars": context.len() }),
        ));

        self.client
            .stream_complete(&messages, &CompletionOptions::new(0.3, 4000))
            .await
    }

    fn fallback_single(&self, result: &ExecutionResult, reason: &str) -> String {
        warn!("Step summary fell back to existing text: {}", reason);
        self.observer.record(ObservedEvent::new(
            "summarizer",
            "summary_fallback",
            json!({ "scope": "step", "step": result.step.title, "reason": reason }),
        ));
        step_text(result)
    }
}

fn step_text(result: &ExecutionResult) -> String {
    if let Some(error) = &result.error {
        return format!("failed ({})", error);
    }
    match &result.summary {
        Some(summary) if !summary.trim().is_empty() => summary.clone(),
        _ => truncate_chars(&result.data.to_string(), COMBINED_DATA_CHARS),
    }
}

fn naive_join(results: &[ExecutionResult]) -> String {
    results
        .iter()
        .map(|r| format!("{}: {}", r.step.title, step_text(r)))
        .collect::<Vec<_>>()
        .join("\n")
}

const ANSWER_PROMPT: &str = r#"You are a financial research assistant. Answer the user's question using the research data provided.

Rules:
- Use the numbers exactly as given in the research data. Quote prices, changes and volumes where relevant.
- Never claim data is missing, unavailable or that you cannot access real-time data when the research data contains it.
- If a step FAILED, say briefly that this source could not be reached and work with the rest.
- Mention news sources and how recent they are when you cite them.
- Be concise and structured: short paragraphs or bullet points in Markdown.
- Do not give personalized investment advice; present facts and balanced context."#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PlanStep, ProviderTag};
    use crate::observability::RecordingObserver;
    use crate::test_support::{FailingCompletion, ScriptedCompletion};
    use futures::StreamExt;

    fn result(summary: &str) -> ExecutionResult {
        ExecutionResult::success(
            PlanStep::new("Get NVDA stock quote", "Price"),
            ProviderTag::FmpQuote,
            json!({ "symbol": "NVDA", "price": 875.28 }),
            summary.to_string(),
        )
    }

    fn build(client: Arc<dyn CompletionClient>) -> (Summarizer, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::new());
        (Summarizer::new(client, observer.clone()), observer)
    }

    #[tokio::test]
    async fn test_zero_results_is_a_plain_string() {
        let (summarizer, _) = build(Arc::new(FailingCompletion));
        let summary = summarizer.summarize_results(&[], "anything?").await;
        assert_eq!(summary, NO_RESULTS);
    }

    #[tokio::test]
    async fn test_sane_summary_skips_model() {
        let client = Arc::new(ScriptedCompletion::new(vec![]));
        let (summarizer, _) = build(client.clone());

        let text = summarizer
            .summarize_result(&result("NVDA: $875.28 (+2.14%), volume 41.20M"), "price?")
            .await;

        assert_eq!(text, "NVDA: $875.28 (+2.14%), volume 41.20M");
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_short_summary_is_enhanced() {
        let client = Arc::new(ScriptedCompletion::new(vec!["NVDA trades at $875.28."]));
        let (summarizer, _) = build(client.clone());

        let text = summarizer.summarize_result(&result("NVDA"), "price?").await;

        assert_eq!(text, "NVDA trades at $875.28.");
        assert!(client.calls()[0].0[1].content.contains("875.28"));
    }

    #[tokio::test]
    async fn test_combined_falls_back_to_join() {
        let (summarizer, observer) = build(Arc::new(FailingCompletion));
        let results = vec![
            result("NVDA: $875.28 (+2.14%)"),
            ExecutionResult::failure(
                PlanStep::new("Get NVDA news", "Headlines"),
                ProviderTag::PolygonNews,
                "Upstream request timed out".into(),
            ),
        ];

        let text = summarizer.summarize_results(&results, "How is NVDA?").await;

        assert!(text.contains("Get NVDA stock quote: NVDA: $875.28 (+2.14%)"));
        assert!(text.contains("Get NVDA news: failed (Upstream request timed out)"));
        assert_eq!(observer.count("summary_fallback"), 1);
    }

    #[tokio::test]
    async fn test_final_answer_streams_and_uses_context() {
        let client = Arc::new(ScriptedCompletion::new(vec![]).with_stream(vec!["NVDA ", "is up."]));
        let (summarizer, observer) = build(client.clone());

        let stream = summarizer
            .generate_final_answer("How is NVDA?", &[result("NVDA: $875.28 (+2.14%)")], &[])
            .await
            .unwrap();
        let chunks: Vec<String> = stream.map(|c| c.unwrap()).collect().await;

        assert_eq!(chunks.concat(), "NVDA is up.");
        let (messages, options) = &client.calls()[0];
        assert!(messages.last().unwrap().content.contains("- Price: $875.28"));
        assert_eq!(options.max_tokens, 4000);
        assert_eq!(observer.names(), vec!["answer_started"]);
    }

    #[tokio::test]
    async fn test_final_answer_errors_propagate() {
        let (summarizer, _) = build(Arc::new(FailingCompletion));
        let outcome = summarizer.generate_final_answer("How is NVDA?", &[], &[]).await;
        assert!(outcome.is_err());

        let client = Arc::new(ScriptedCompletion::new(vec![]).with_stream(vec!["a", "b", "c"]).failing_stream_after(1));
        let (summarizer, _) = build(client);
        let items: Vec<Result<String>> = summarizer
            .generate_final_answer("q", &[], &[])
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }
}
