use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::agent::Agent;
use crate::error::{AgentError, Result};
use crate::jobs::{CallbackTarget, StreamId};

/// Header carrying the agent's shared secret.
pub const API_KEY_HEADER: &str = "X-API-Key";
/// Prefix of every route.
pub const API_PREFIX: &str = "/agent/v1";

#[derive(Debug, Deserialize)]
pub struct StartStreamRequest {
    pub stream_id: StreamId,
    pub ffmpeg_command: Vec<String>,
    pub callback_url: String,
    pub callback_api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct StopStreamRequest {
    pub stream_id: StreamId,
}

#[derive(Debug, Deserialize)]
pub struct ThumbnailRequest {
    pub stream_id: StreamId,
    pub ffmpeg_command: Vec<String>,
    pub upload_url: String,
    pub callback_api_key: String,
}

#[derive(Debug, Serialize)]
struct StartStreamResponse {
    status: &'static str,
    message: String,
    job_id: u32,
}

#[derive(Debug, Serialize)]
struct StopStreamResponse {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    stopped_count: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ThumbnailResponse {
    status: &'static str,
    message: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    running_streams: Vec<StreamId>,
    process_count: usize,
}

#[derive(Debug, Serialize)]
struct TestRunResponse {
    status: &'static str,
    return_code: Option<i32>,
    logs: String,
}

/// Build the agent's HTTP API.
pub fn router(agent: Arc<Agent>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let protected = Router::new()
        .route("/stream/start", post(start_stream_handler))
        .route("/stream/stop", post(stop_stream_handler))
        .route("/stream/thumbnail", post(thumbnail_handler))
        .route("/test-streaming", get(test_streaming_handler))
        .route_layer(middleware::from_fn_with_state(
            agent.clone(),
            require_api_key,
        ));

    let api = Router::new()
        .route("/health", get(health_handler))
        .merge(protected);

    Router::new()
        .nest(API_PREFIX, api)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(agent)
}

async fn require_api_key(
    State(agent): State<Arc<Agent>>,
    request: Request,
    next: Next,
) -> Result<Response> {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    if provided != Some(agent.config().api_key.as_str()) {
        tracing::warn!(
            path = %request.uri().path(),
            key_present = provided.is_some(),
            "Rejected request with invalid API key"
        );
        return Err(AgentError::Unauthorized);
    }

    Ok(next.run(request).await)
}

async fn start_stream_handler(
    State(agent): State<Arc<Agent>>,
    Json(payload): Json<StartStreamRequest>,
) -> Result<Json<StartStreamResponse>> {
    tracing::info!(
        stream_id = payload.stream_id,
        command = %payload.ffmpeg_command.join(" "),
        "Received start request"
    );

    let callback = CallbackTarget {
        url: payload.callback_url,
        key: payload.callback_api_key,
    };
    let job_id = agent
        .start_job(payload.stream_id, &payload.ffmpeg_command, callback)
        .await?;

    Ok(Json(StartStreamResponse {
        status: "success",
        message: format!("Stream {} is starting.", payload.stream_id),
        job_id: job_id.as_u32(),
    }))
}

async fn stop_stream_handler(
    State(agent): State<Arc<Agent>>,
    Json(payload): Json<StopStreamRequest>,
) -> Json<StopStreamResponse> {
    tracing::info!(stream_id = payload.stream_id, "Received stop request");

    let stopped = agent.stop_job(payload.stream_id).await;
    if stopped == 0 {
        return Json(StopStreamResponse {
            status: "not_found",
            message: format!("Stream {} not found or not running.", payload.stream_id),
            stopped_count: None,
        });
    }

    Json(StopStreamResponse {
        status: "success",
        message: format!(
            "Stopped {} process(es) for stream {}.",
            stopped, payload.stream_id
        ),
        stopped_count: Some(stopped),
    })
}

async fn thumbnail_handler(
    State(agent): State<Arc<Agent>>,
    Json(payload): Json<ThumbnailRequest>,
) -> Result<Json<ThumbnailResponse>> {
    tracing::info!(stream_id = payload.stream_id, "Received thumbnail request");

    let upload = CallbackTarget {
        url: payload.upload_url,
        key: payload.callback_api_key,
    };
    agent
        .generate_thumbnail(payload.stream_id, &payload.ffmpeg_command, upload)
        .await?;

    Ok(Json(ThumbnailResponse {
        status: "success",
        message: format!("Thumbnail for stream {} uploaded.", payload.stream_id),
    }))
}

async fn health_handler(State(agent): State<Arc<Agent>>) -> Json<HealthResponse> {
    let report = agent.health().await;
    Json(HealthResponse {
        status: "ok",
        running_streams: report.running_streams,
        process_count: report.process_count,
    })
}

async fn test_streaming_handler(State(agent): State<Arc<Agent>>) -> Result<Json<TestRunResponse>> {
    let run = agent.test_run().await?;
    let status = if run.outcome.success() {
        tracing::info!("Test run succeeded");
        "success"
    } else {
        tracing::error!(outcome = %run.outcome, "Test run failed");
        "failure"
    };

    Ok(Json(TestRunResponse {
        status,
        return_code: run.outcome.code,
        logs: run.logs(),
    }))
}
