//! HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/chat` | Grounded answer, streamed as plain text or returned whole |
//! | `POST` | `/api/rag/query` | Ranked matches and their confidence tier |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! The caller's identity comes from the `x-owner-id` header, which the
//! upstream authentication layer is expected to set. Requests without it
//! are recorded as `anonymous`.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `generation_failed` (502), `internal` (500).
//! `/api/rag/query` keeps its own shape on bad input: `{ "matches": [], "error": "…" }`.
//!
//! # Streaming
//!
//! `POST /api/chat` with `stream` absent or `true` responds with
//! `text/plain; charset=utf-8` and writes each increment as it arrives. The
//! `x-rag-confidence` header carries the tier. A mid-stream generation
//! failure aborts the body, and a client disconnect cancels generation.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use candor_core::error::PipelineError;
use candor_core::models::{AssistantMessage, ChatMessage, ConfidenceTier, DocumentMatch};

use crate::config::Config;
use crate::pipeline::{AnswerRequest, AppServices, ANONYMOUS_OWNER};

/// Header carrying the authenticated caller's id.
pub const OWNER_HEADER: &str = "x-owner-id";

/// Header carrying the confidence tier of a streamed answer.
pub const CONFIDENCE_HEADER: &str = "x-rag-confidence";

/// Build the router over already-constructed services.
pub fn router(services: AppServices) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/api/rag/query", post(handle_rag_query))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(services)
}

/// Build services from `config` and serve on `[server].bind` until killed.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = AppServices::from_config(config).await?;
    let app = router(services);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "candor listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PipelineError::GenerationFailure(_) => StatusCode::BAD_GATEWAY,
            PipelineError::UpstreamDegraded { .. } | PipelineError::PersistenceFailure(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let code = err.code();
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    messages: Vec<ChatMessage>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    is_first_message: bool,
    #[serde(default = "default_stream")]
    stream: bool,
}

fn default_stream() -> bool {
    true
}

#[derive(Serialize)]
struct ChatResponse {
    message: AssistantMessage,
}

fn owner_id(headers: &HeaderMap) -> String {
    headers
        .get(OWNER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(ANONYMOUS_OWNER)
        .to_string()
}

async fn handle_chat(
    State(services): State<AppServices>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(req) = body.map_err(|e| bad_request(e.body_text()))?;
    if req.messages.is_empty() {
        return Err(bad_request("messages must not be empty"));
    }

    let owner = owner_id(&headers);
    let mut request = AnswerRequest::new(req.messages).first_message(req.is_first_message);
    if let Some(conversation_id) = req.conversation_id.filter(|c| !c.trim().is_empty()) {
        request = request.in_conversation(conversation_id, owner);
    } else {
        request.owner_id = owner;
    }

    if !req.stream {
        let message = services.answers.answer(request).await?;
        return Ok(Json(ChatResponse { message }).into_response());
    }

    let stream = services.answers.answer_stream(request).await?;
    let confidence = stream.confidence();
    let body = Body::from_stream(stream.map(|item| item.map(Bytes::from)));

    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        CONFIDENCE_HEADER,
        HeaderValue::from_static(confidence.as_str()),
    );
    Ok(response)
}

// ============ POST /api/rag/query ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RagQueryRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    match_count: Option<usize>,
}

#[derive(Serialize)]
struct RagMatch {
    id: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
}

impl From<DocumentMatch> for RagMatch {
    fn from(m: DocumentMatch) -> Self {
        Self {
            id: m.id,
            content: m.content,
            similarity: m.similarity,
            title: m.title,
        }
    }
}

#[derive(Serialize)]
struct RagQueryResponse {
    matches: Vec<RagMatch>,
    confidence: ConfidenceTier,
}

#[derive(Serialize)]
struct RagQueryError {
    matches: Vec<RagMatch>,
    error: String,
}

fn rag_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(RagQueryError {
            matches: Vec::new(),
            error: message.into(),
        }),
    )
        .into_response()
}

async fn handle_rag_query(
    State(services): State<AppServices>,
    body: Result<Json<RagQueryRequest>, JsonRejection>,
) -> Response {
    let req = match body {
        Ok(Json(req)) => req,
        Err(e) => return rag_error(StatusCode::BAD_REQUEST, e.body_text()),
    };
    let query = req.query.unwrap_or_default();

    match services
        .answers
        .retriever()
        .query(&query, req.match_count)
        .await
    {
        Ok(retrieval) => Json(RagQueryResponse {
            matches: retrieval.matches.into_iter().map(RagMatch::from).collect(),
            confidence: retrieval.confidence,
        })
        .into_response(),
        Err(PipelineError::InvalidInput(message)) => rag_error(StatusCode::BAD_REQUEST, message),
        Err(e) => {
            tracing::error!(error = %e, "rag query failed");
            rag_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
