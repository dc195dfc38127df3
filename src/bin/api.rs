use financial_research_assistant::{
    api::start_server, observability::tracing_observer, Config, ResearchOrchestrator,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration (.env included)
    let config = Config::from_env()?;

    if config.openrouter_api_key.is_none() {
        warn!("OPENROUTER_API_KEY not set; requests must carry their own openrouterKey");
    }

    info!("Financial Research Assistant - API Server");
    info!("Port: {}", config.port);

    let orchestrator = Arc::new(ResearchOrchestrator::from_config(&config, tracing_observer())?);

    info!("Orchestrator initialized");
    info!("Starting API server...");

    start_server(orchestrator, config.port).await?;

    Ok(())
}
