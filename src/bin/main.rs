use financial_research_assistant::{
    observability::tracing_observer,
    orchestrator::{AnswerRequest, PlanRunRequest},
    sse::{EventSink, SseEvent},
    Config, ExecutionResult, ResearchOrchestrator,
};
use std::io::Write;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout carries only the event stream
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let query = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if query.trim().is_empty() {
        eprintln!("usage: research <question>");
        std::process::exit(2);
    }

    let config = Config::from_env()?;
    let orchestrator = ResearchOrchestrator::from_config(&config, tracing_observer())?;

    info!(query = %query, "Running research");

    // === Plan-run ===
    let (sink, mut rx) = EventSink::channel();
    let request = PlanRunRequest {
        query: query.clone(),
        openrouter_key: None,
        conversation_history: Vec::new(),
        max_steps: None,
        model: None,
    };

    let mut results: Vec<ExecutionResult> = Vec::new();
    let mut failed = false;
    let printer = async {
        while let Some(event) = rx.recv().await {
            print!("{}", event.encode());
            match event.event.as_str() {
                "executionResults" => {
                    results = serde_json::from_value(event.data["results"].clone())
                        .unwrap_or_default();
                }
                "error" => failed = true,
                _ => {}
            }
        }
    };
    tokio::join!(orchestrator.run_plan(request, sink), printer);

    if failed {
        std::process::exit(1);
    }

    // === Answer ===
    println!("\n=== ANSWER ===");
    let (sink, mut rx) = EventSink::channel();
    let request = AnswerRequest {
        query,
        execution_results: results,
        openrouter_key: None,
        conversation_history: Vec::new(),
        model: None,
    };

    let printer = async {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            print_answer_event(&mut stdout, &event);
        }
    };
    tokio::join!(orchestrator.run_answer(request, sink), printer);
    println!();

    Ok(())
}

fn print_answer_event(out: &mut impl Write, event: &SseEvent) {
    let _ = match event.event.as_str() {
        "delta" => write!(out, "{}", event.data["content"].as_str().unwrap_or_default()),
        "error" => writeln!(out, "\n[error] {}", event.data["message"].as_str().unwrap_or_default()),
        _ => Ok(()),
    };
    let _ = out.flush();
}
