//! REST + SSE API server for the research assistant
//!
//! Streams plan-run and answer phases to the frontend as Server-Sent Events.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::orchestrator::{AnswerRequest, PlanRunRequest, RefineRequest, ResearchOrchestrator};
use crate::sse::{EventSink, SseEvent};

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

fn bad_request(message: String) -> Response {
    warn!("Rejected request: {}", message);
    (StatusCode::BAD_REQUEST, Json(ApiResponse::error(message))).into_response()
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<ResearchOrchestrator>,
}

/// =============================
/// Health Endpoint
/// =============================

async fn health(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "capabilities": state.orchestrator.executor().providers().capabilities(),
    }))
}

/// =============================
/// SSE Endpoints
/// =============================

fn event_stream(rx: UnboundedReceiver<SseEvent>) -> Response {
    let stream = UnboundedReceiverStream::new(rx).map(|e| {
        Ok::<_, Infallible>(Event::default().event(e.event).data(e.data.to_string()))
    });

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

async fn plan_run(
    State(state): State<ApiState>,
    payload: Result<Json<PlanRunRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    if let Err(e) = state
        .orchestrator
        .settings()
        .validate(&req.query, req.openrouter_key.as_deref())
    {
        return bad_request(e.public_message());
    }

    info!(query = %req.query, "Received plan-run request");

    let (sink, rx) = EventSink::channel();
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move { orchestrator.run_plan(req, sink).await });

    event_stream(rx)
}

async fn answer(
    State(state): State<ApiState>,
    payload: Result<Json<AnswerRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    if let Err(e) = state
        .orchestrator
        .settings()
        .validate(&req.query, req.openrouter_key.as_deref())
    {
        return bad_request(e.public_message());
    }

    info!(
        query = %req.query,
        results = req.execution_results.len(),
        "Received answer request"
    );

    let (sink, rx) = EventSink::channel();
    let orchestrator = state.orchestrator.clone();
    tokio::spawn(async move { orchestrator.run_answer(req, sink).await });

    event_stream(rx)
}

/// =============================
/// Refine Endpoint
/// =============================

async fn refine(
    State(state): State<ApiState>,
    payload: Result<Json<RefineRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(body) => body,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    match state.orchestrator.refine(&req).await {
        Ok(steps) => {
            info!(steps = steps.len(), "Refined plan");
            (
                StatusCode::OK,
                Json(ApiResponse::success(serde_json::json!({ "steps": steps }))),
            )
                .into_response()
        }
        Err(e) => bad_request(e.public_message()),
    }
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<ResearchOrchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/plan-run", post(plan_run))
        .route("/answer", post(answer))
        .route("/refine", post(refine))
        .route("/api/plan-run", post(plan_run))
        .route("/api/answer", post(answer))
        .route("/api/refine", post(refine))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(orchestrator: Arc<ResearchOrchestrator>, port: u16) -> crate::Result<()> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
