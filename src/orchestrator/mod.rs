//! Research orchestrator - drives one SSE connection
//!
//! PLAN → EXECUTE (per step, with heartbeats) → SUMMARIZE → DONE
//! and, on a second request, ANSWER (streamed deltas).

use crate::config::{Config, DEFAULT_HISTORY_LIMIT, DEFAULT_MAX_STEPS, DEFAULT_MAX_STEPS_CEILING};
use crate::error::ResearchError;
use crate::executor::Executor;
use crate::llm::{CompletionClient, LlmConnector, OpenRouterConnector};
use crate::models::{recent_history, ChatMessage, ExecutionResult, PlanStep, StepStatus};
use crate::observability::{ObservedEvent, Observer};
use crate::planner::{LlmPlanner, Planner};
use crate::providers::Providers;
use crate::sse::{
    progress_message, round_secs, EventSink, Heartbeat, ResearchEvent, RunTotals, HEARTBEAT_INTERVAL,
};
use crate::summarizer::Summarizer;
use crate::Result;
use futures::{FutureExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use uuid::Uuid;

//
// ================= Requests =================
//

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanRunRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub openrouter_key: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
    #[serde(default)]
    pub max_steps: Option<usize>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub execution_results: Vec<ExecutionResult>,
    #[serde(default)]
    pub openrouter_key: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefineRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub execution_results: Vec<ExecutionResult>,
    #[serde(default)]
    pub openrouter_key: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<ChatMessage>,
    #[serde(default)]
    pub max_steps: Option<usize>,
    #[serde(default)]
    pub model: Option<String>,
}

//
// ================= Settings =================
//

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub default_api_key: Option<String>,
    pub default_max_steps: usize,
    pub max_steps_ceiling: usize,
    pub history_limit: usize,
    pub heartbeat_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            default_api_key: None,
            default_max_steps: DEFAULT_MAX_STEPS,
            max_steps_ceiling: DEFAULT_MAX_STEPS_CEILING,
            history_limit: DEFAULT_HISTORY_LIMIT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_api_key: config.openrouter_api_key.clone(),
            default_max_steps: config.default_max_steps,
            max_steps_ceiling: config.max_steps_ceiling,
            history_limit: config.history_limit,
            heartbeat_interval: HEARTBEAT_INTERVAL,
        }
    }

    pub fn resolve_max_steps(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_max_steps)
            .clamp(1, self.max_steps_ceiling)
    }

    /// Request key wins over the server default
    pub fn resolve_api_key(&self, requested: Option<&str>) -> Result<String> {
        requested
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
            .or_else(|| self.default_api_key.clone())
            .ok_or_else(|| ResearchError::InvalidRequest("openrouterKey is required".to_string()))
    }

    /// Checks every request must pass before a stream opens
    pub fn validate(&self, query: &str, requested_key: Option<&str>) -> Result<String> {
        if query.trim().is_empty() {
            return Err(ResearchError::InvalidRequest("query is required".to_string()));
        }
        self.resolve_api_key(requested_key)
    }
}

//
// ================= Orchestrator =================
//

pub struct ResearchOrchestrator {
    executor: Arc<Executor>,
    connector: Arc<dyn LlmConnector>,
    observer: Arc<dyn Observer>,
    settings: PipelineSettings,
}

impl ResearchOrchestrator {
    pub fn new(
        executor: Arc<Executor>,
        connector: Arc<dyn LlmConnector>,
        observer: Arc<dyn Observer>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            executor,
            connector,
            observer,
            settings,
        }
    }

    /// Wire the live providers and OpenRouter from configuration
    pub fn from_config(config: &Config, observer: Arc<dyn Observer>) -> Result<Self> {
        let providers = Providers::from_config(config)?;
        let connector = OpenRouterConnector::new(
            config.openrouter_base_url.clone(),
            config.default_model.clone(),
        )?;

        info!(
            capabilities = ?providers.capabilities(),
            model = %config.default_model,
            "Research pipeline configured"
        );

        Ok(Self::new(
            Arc::new(Executor::new(providers, observer.clone())),
            Arc::new(connector),
            observer,
            PipelineSettings::from_config(config),
        ))
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    fn client(&self, query: &str, key: Option<&str>, model: Option<&str>) -> Result<Arc<dyn CompletionClient>> {
        let key = self.settings.validate(query, key)?;
        Ok(self.connector.connect(&key, model))
    }

    fn record(&self, name: &'static str, fields: serde_json::Value) {
        self.observer
            .record(ObservedEvent::new("orchestrator", name, fields));
    }

    /// Plan, execute and summarize, streaming every stage. Always closes the sink.
    pub async fn run_plan(&self, request: PlanRunRequest, sink: EventSink) {
        self.guarded("plan-run", &sink, self.plan_body(&request, &sink))
            .await;
    }

    /// Stream the final answer for already-executed results. Always closes the sink.
    pub async fn run_answer(&self, request: AnswerRequest, sink: EventSink) {
        self.guarded("answer", &sink, self.answer_body(&request, &sink))
            .await;
    }

    /// Follow-up steps for an executed plan; empty when research is complete
    pub async fn refine(&self, request: &RefineRequest) -> Result<Vec<PlanStep>> {
        let client = self.client(
            &request.query,
            request.openrouter_key.as_deref(),
            request.model.as_deref(),
        )?;
        let history = recent_history(&request.conversation_history, self.settings.history_limit);
        let max_steps = self.settings.resolve_max_steps(request.max_steps);

        let planner = LlmPlanner::new(client, self.observer.clone());
        Ok(planner
            .refine_plan(&request.query, &request.execution_results, &history, max_steps)
            .await)
    }

    /// True once the client has gone; records where the run stopped
    fn disconnected(&self, sink: &EventSink, run_id: &str, phase: &'static str, step_index: usize) -> bool {
        if !sink.is_closed() {
            return false;
        }
        info!(run_id = %run_id, phase, step_index, "Client disconnected, stopping run");
        self.record(
            "client_disconnected",
            json!({ "runId": run_id, "phase": phase, "stepIndex": step_index }),
        );
        true
    }

    /// Run a body; its error or panic becomes one `error` event, then the sink closes
    async fn guarded<F>(&self, endpoint: &'static str, sink: &EventSink, body: F)
    where
        F: Future<Output = Result<()>>,
    {
        match AssertUnwindSafe(body).catch_unwind().await {
            Ok(Ok(())) => debug!(endpoint, "Stream finished"),
            Ok(Err(e)) => {
                error!(endpoint, error = %e, "Stream failed");
                sink.emit(ResearchEvent::error(e.public_message()));
            }
            Err(_) => {
                error!(endpoint, "Stream body panicked");
                sink.emit(ResearchEvent::error("Internal error while processing the request"));
            }
        }
        sink.close();
    }

    async fn plan_body(&self, request: &PlanRunRequest, sink: &EventSink) -> Result<()> {
        let client = self.client(
            &request.query,
            request.openrouter_key.as_deref(),
            request.model.as_deref(),
        )?;
        let history = recent_history(&request.conversation_history, self.settings.history_limit);
        let max_steps = self.settings.resolve_max_steps(request.max_steps);
        let run_id = Uuid::new_v4().to_string();
        let run_started = Instant::now();

        info!(run_id = %run_id, max_steps, "Starting research run");

        // === PLAN ===
        sink.emit(ResearchEvent::status("Planning research..."));
        let planner = LlmPlanner::new(client.clone(), self.observer.clone());
        let mut steps = planner
            .generate_plan(&request.query, &history, max_steps)
            .await;
        sink.emit(ResearchEvent::Plan {
            steps: steps.clone(),
        });

        // === EXECUTE ===
        let total = steps.len();
        let mut results = Vec::with_capacity(total);

        for (index, step) in steps.iter_mut().enumerate() {
            if self.disconnected(sink, &run_id, "execute", index) {
                return Ok(());
            }

            step.status = StepStatus::Running;
            step.progress_message = Some(progress_message(Duration::ZERO).to_string());
            sink.emit(ResearchEvent::StepStart {
                step_index: index,
                total_steps: total,
                step: step.clone(),
            });

            let started = Instant::now();
            let heartbeat = Heartbeat::start(
                sink.clone(),
                index,
                started,
                self.settings.heartbeat_interval,
            );
            let mut result = self.executor.execute_step(step, None).await;
            heartbeat.stop().await;

            let elapsed = started.elapsed();
            step.elapsed_time = Some(round_secs(elapsed));
            step.progress_message = Some(progress_message(elapsed).to_string());
            step.summary = result.summary.clone();
            step.status = if result.is_success() {
                StepStatus::Done
            } else {
                StepStatus::Failed
            };
            result.step = step.clone();

            let event = match &result.error {
                None => ResearchEvent::StepComplete {
                    step_index: index,
                    step: step.clone(),
                    provider: result.provider,
                    summary: result.summary.clone(),
                },
                Some(error) => ResearchEvent::StepError {
                    step_index: index,
                    step: step.clone(),
                    error: error.clone(),
                },
            };
            sink.emit(event);
            results.push(result);
        }

        // client may have left during the last step
        if self.disconnected(sink, &run_id, "summarize", total) {
            return Ok(());
        }

        sink.emit(ResearchEvent::ExecutionResults {
            results: results.clone(),
        });

        // === SUMMARIZE ===
        sink.emit(ResearchEvent::status("Summarizing findings..."));
        let summarizer = Summarizer::new(client, self.observer.clone());
        let summary = summarizer
            .summarize_results(&results, &request.query)
            .await;
        sink.emit(ResearchEvent::Summary { summary });

        // === DONE ===
        let failed = results.iter().filter(|r| !r.is_success()).count();
        let totals = RunTotals {
            steps_completed: results.len() - failed,
            steps_failed: failed,
            total_steps: total,
        };
        sink.emit(ResearchEvent::Done {
            totals,
            run_id: run_id.clone(),
        });

        info!(
            run_id = %run_id,
            completed = totals.steps_completed,
            failed = totals.steps_failed,
            elapsed_ms = run_started.elapsed().as_millis() as u64,
            "Research run finished"
        );
        self.record(
            "run_finished",
            json!({
                "runId": run_id,
                "stepsCompleted": totals.steps_completed,
                "stepsFailed": totals.steps_failed,
                "totalSteps": total,
            }),
        );
        Ok(())
    }

    async fn answer_body(&self, request: &AnswerRequest, sink: &EventSink) -> Result<()> {
        let client = self.client(
            &request.query,
            request.openrouter_key.as_deref(),
            request.model.as_deref(),
        )?;
        let history = recent_history(&request.conversation_history, self.settings.history_limit);

        sink.emit(ResearchEvent::status("Generating answer..."));

        let summarizer = Summarizer::new(client, self.observer.clone());
        let mut stream = summarizer
            .generate_final_answer(&request.query, &request.execution_results, &history)
            .await?;

        let mut chunks = 0;
        let mut characters = 0;
        while let Some(item) = stream.next().await {
            let content = item?;
            if content.is_empty() {
                continue;
            }
            chunks += 1;
            characters += content.chars().count();

            if !sink.emit(ResearchEvent::Delta { content }) {
                info!(chunks, "Client disconnected during answer stream");
                self.record("client_disconnected", json!({ "phase": "answer", "chunks": chunks }));
                return Ok(());
            }
        }

        sink.emit(ResearchEvent::AnswerDone { chunks, characters });
        info!(chunks, characters, "Answer streamed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CompletionOptions, TextStream};
    use crate::observability::RecordingObserver;
    use crate::sse::SseEvent;
    use crate::providers::{Quote, QuoteProvider};
    use crate::test_support::{sample_quote, ScriptedCompletion, StaticConnector, StubProviders};
    use async_trait::async_trait;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        orchestrator: ResearchOrchestrator,
        observer: Arc<RecordingObserver>,
        stubs: StubProviders,
    }

    fn harness(connector: StaticConnector, stubs: StubProviders) -> Harness {
        let observer = Arc::new(RecordingObserver::new());
        let executor = Arc::new(Executor::new(stubs.providers(), observer.clone()));
        let settings = PipelineSettings {
            default_api_key: Some("sk-server".into()),
            heartbeat_interval: Duration::from_secs(60),
            ..Default::default()
        };
        Harness {
            orchestrator: ResearchOrchestrator::new(executor, Arc::new(connector), observer.clone(), settings),
            observer,
            stubs,
        }
    }

    fn plan_request(query: &str) -> PlanRunRequest {
        PlanRunRequest {
            query: query.to_string(),
            openrouter_key: Some("sk-user".into()),
            conversation_history: Vec::new(),
            max_steps: None,
            model: None,
        }
    }

    async fn drain(mut rx: UnboundedReceiver<SseEvent>) -> Vec<SseEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    fn names(events: &[SseEvent]) -> Vec<&str> {
        events.iter().map(|e| e.event.as_str()).collect()
    }

    #[tokio::test]
    async fn test_plan_run_event_order() {
        let client = ScriptedCompletion::new(vec![
            r#"[{"title":"Get AAPL stock quote","description":"Fetch AAPL price"},{"title":"AAPL news","description":"Latest AAPL headlines"}]"#,
            "Apple is up 2.5% on steady news flow.",
        ]);
        let h = harness(StaticConnector::new(Arc::new(client)), StubProviders::all());
        let (sink, rx) = EventSink::channel();

        h.orchestrator.run_plan(plan_request("How is AAPL doing?"), sink).await;
        let events = drain(rx).await;

        assert_eq!(
            names(&events),
            vec![
                "status", "plan", "stepStart", "stepComplete", "stepStart", "stepComplete",
                "executionResults", "status", "summary", "done",
            ]
        );
        assert_eq!(events[2].data["step"]["status"], "running");
        assert_eq!(events[2].data["step"]["progressMessage"], "Analyzing data...");
        assert_eq!(events[3].data["step"]["status"], "done");
        assert_eq!(events[3].data["provider"], "fmp_quote");

        let results = &events[6].data["results"];
        assert_eq!(results.as_array().unwrap().len(), 2);
        assert!(results[0]["step"]["elapsedTime"].is_number());
        assert_eq!(results[0]["step"]["status"], "done");
        assert!(results[0]["step"]["progressMessage"].is_string());

        assert_eq!(events[8].data["summary"], "Apple is up 2.5% on steady news flow.");
        let done = &events[9].data;
        assert_eq!(done["stepsCompleted"], 2);
        assert_eq!(done["stepsFailed"], 0);
        assert_eq!(done["totalSteps"], 2);
        assert!(done["runId"].as_str().is_some());
        assert_eq!(h.observer.count("run_finished"), 1);
    }

    #[tokio::test]
    async fn test_failed_step_emits_step_error() {
        let h = harness(StaticConnector::failing(), StubProviders::all());
        h.stubs.quotes.set_failing();
        let (sink, rx) = EventSink::channel();

        h.orchestrator
            .run_plan(plan_request("What's NVDA's price today?"), sink)
            .await;
        let events = drain(rx).await;

        assert_eq!(names(&events)[3], "stepError");
        assert_eq!(events[3].data["step"]["status"], "failed");
        assert_eq!(names(&events)[5], "stepComplete");

        let done = events.last().unwrap();
        assert_eq!(done.event, "done");
        assert_eq!(done.data["stepsCompleted"], 1);
        assert_eq!(done.data["stepsFailed"], 1);
    }

    #[tokio::test]
    async fn test_missing_key_reports_error_and_closes() {
        let observer = Arc::new(RecordingObserver::new());
        let executor = Arc::new(Executor::new(StubProviders::all().providers(), observer.clone()));
        let orchestrator = ResearchOrchestrator::new(
            executor,
            Arc::new(StaticConnector::failing()),
            observer,
            PipelineSettings::default(),
        );
        let (sink, rx) = EventSink::channel();

        let mut request = plan_request("NVDA news");
        request.openrouter_key = None;
        orchestrator.run_plan(request, sink).await;
        let events = drain(rx).await;

        assert_eq!(names(&events), vec!["error"]);
        assert_eq!(events[0].data["message"], "openrouterKey is required");
    }

    #[tokio::test]
    async fn test_disconnect_stops_before_executing() {
        let h = harness(StaticConnector::failing(), StubProviders::all());
        let (sink, rx) = EventSink::channel();
        drop(rx);

        h.orchestrator
            .run_plan(plan_request("What's NVDA's price today?"), sink)
            .await;

        assert_eq!(h.observer.count("client_disconnected"), 1);
        assert_eq!(h.stubs.quotes.calls(), 0);
        assert_eq!(h.observer.count("run_finished"), 0);
    }

    #[tokio::test]
    async fn test_answer_streams_deltas() {
        let client = ScriptedCompletion::new(vec![]).with_stream(vec!["NVDA ", "", "rose 2%."]);
        let connector = StaticConnector::new(Arc::new(client));
        let h = harness(connector, StubProviders::all());
        let (sink, rx) = EventSink::channel();

        let request = AnswerRequest {
            query: "How is NVDA?".into(),
            execution_results: Vec::new(),
            openrouter_key: None,
            conversation_history: Vec::new(),
            model: None,
        };
        h.orchestrator.run_answer(request, sink).await;
        let events = drain(rx).await;

        assert_eq!(names(&events), vec!["status", "delta", "delta", "done"]);
        assert_eq!(events[1].data["content"], "NVDA ");
        assert_eq!(events[3].data["chunks"], 2);
        assert_eq!(events[3].data["characters"], 13);
    }

    #[tokio::test]
    async fn test_answer_stream_failure_is_terminal_error() {
        let client = ScriptedCompletion::new(vec![])
            .with_stream(vec!["partial ", "never"])
            .failing_stream_after(1);
        let h = harness(StaticConnector::new(Arc::new(client)), StubProviders::all());
        let (sink, rx) = EventSink::channel();

        let request = AnswerRequest {
            query: "q".into(),
            execution_results: Vec::new(),
            openrouter_key: Some("sk-user".into()),
            conversation_history: Vec::new(),
            model: None,
        };
        h.orchestrator.run_answer(request, sink).await;
        let events = drain(rx).await;

        assert_eq!(names(&events), vec!["status", "delta", "error"]);
        assert_eq!(events[2].data["message"], "The answer stream was interrupted");
    }

    /// Drops the client's receiver while the step is running
    struct DisconnectingQuotes {
        rx: std::sync::Mutex<Option<UnboundedReceiver<SseEvent>>>,
    }

    #[async_trait]
    impl QuoteProvider for DisconnectingQuotes {
        fn is_available(&self) -> bool {
            true
        }

        async fn get_quote(&self, ticker: &str) -> Result<Option<Quote>> {
            self.rx.lock().unwrap().take();
            Ok(Some(sample_quote(ticker)))
        }
    }

    #[tokio::test]
    async fn test_disconnect_during_last_step_skips_summary() {
        let (sink, rx) = EventSink::channel();
        let quotes: Arc<dyn QuoteProvider> = Arc::new(DisconnectingQuotes {
            rx: std::sync::Mutex::new(Some(rx)),
        });
        let stubs = StubProviders::all();
        let observer = Arc::new(RecordingObserver::new());
        let executor = Arc::new(Executor::new(
            Providers {
                quotes,
                ..stubs.providers()
            },
            observer.clone(),
        ));
        let client = Arc::new(ScriptedCompletion::new(vec![
            r#"[{"title":"Get AAPL stock quote","description":"Fetch AAPL price"}]"#,
            "AAPL is up.",
        ]));
        let orchestrator = ResearchOrchestrator::new(
            executor,
            Arc::new(StaticConnector::new(client.clone())),
            observer.clone(),
            PipelineSettings {
                heartbeat_interval: Duration::from_secs(60),
                ..Default::default()
            },
        );

        orchestrator.run_plan(plan_request("How is AAPL?"), sink).await;

        assert_eq!(client.calls().len(), 1);
        assert_eq!(observer.count("client_disconnected"), 1);
        assert_eq!(observer.count("run_finished"), 0);
    }

    struct PanickingCompletion;

    #[async_trait]
    impl CompletionClient for PanickingCompletion {
        async fn complete(&self, _: &[ChatMessage], _: &CompletionOptions) -> Result<String> {
            panic!("boom");
        }

        async fn stream_complete(&self, _: &[ChatMessage], _: &CompletionOptions) -> Result<TextStream> {
            panic!("boom");
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_error_event() {
        let h = harness(
            StaticConnector::new(Arc::new(PanickingCompletion)),
            StubProviders::all(),
        );
        let (sink, rx) = EventSink::channel();

        let request = AnswerRequest {
            query: "q".into(),
            execution_results: Vec::new(),
            openrouter_key: None,
            conversation_history: Vec::new(),
            model: None,
        };
        h.orchestrator.run_answer(request, sink).await;
        let events = drain(rx).await;

        assert_eq!(names(&events), vec!["status", "error"]);
    }

    #[test]
    fn test_settings_resolution() {
        let settings = PipelineSettings {
            default_api_key: Some("sk-server".into()),
            ..Default::default()
        };

        assert_eq!(settings.resolve_max_steps(Some(50)), DEFAULT_MAX_STEPS_CEILING);
        assert_eq!(settings.resolve_max_steps(Some(0)), 1);
        assert_eq!(settings.resolve_max_steps(None), DEFAULT_MAX_STEPS);
        assert_eq!(settings.resolve_api_key(Some("  ")).unwrap(), "sk-server");
        assert_eq!(settings.resolve_api_key(Some("sk-user")).unwrap(), "sk-user");
        assert!(settings.validate("   ", Some("k")).is_err());
    }
}
