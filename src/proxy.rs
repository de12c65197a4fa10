// Copyright 2026 The Turnstream Project
// SPDX-License-Identifier: Apache-2.0

// HTTP front end
//
// Responsibilities:
// - POST /api/chat: validate the inbound body, hand it to the injected
//   UpstreamClient, return its streaming response unchanged
// - 405 for any other method on /api/chat
// - Heartbeat endpoint
// - Request-level errors as JSON bodies, always before any streaming begins

use crate::message::ChatRequest;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, Response, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Response produced by the upstream client.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

/// Errors that end a request before its stream starts.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("missing credential: {0}")]
    MissingCredential(String),

    #[error("upstream returned {status}")]
    UpstreamStatus { status: StatusCode, body: String },

    #[error("upstream request failed: {0}")]
    UpstreamFailure(String),

    #[error("upstream request timed out: {0}")]
    UpstreamTimeout(String),

    #[error("method not allowed")]
    MethodNotAllowed,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ProxyError::InvalidRequest(_) | ProxyError::MissingCredential(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": self.to_string() })),
            )
                .into_response(),
            ProxyError::UpstreamStatus { status, body } => (
                status,
                Json(json!({ "error": body, "status": status.as_u16() })),
            )
                .into_response(),
            ProxyError::UpstreamFailure(_) => (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": "upstream request failed" })),
            )
                .into_response(),
            ProxyError::UpstreamTimeout(_) => (
                StatusCode::GATEWAY_TIMEOUT,
                Json(json!({ "error": "upstream request timed out" })),
            )
                .into_response(),
            ProxyError::MethodNotAllowed => {
                (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed").into_response()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Trait: UpstreamClient (dependency injection point)
// ---------------------------------------------------------------------------

/// Opens the upstream chat stream for one validated request.
///
/// Implementations must be Send + Sync so they can be shared across request
/// handlers via `Arc`.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn open_chat(
        &self,
        request: ChatRequest,
        request_id: &str,
    ) -> Result<ProxyResponse, ProxyError>;
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<dyn UpstreamClient>,
    pub max_body_bytes: usize,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Heartbeat endpoint: GET /v1/heartbeat -> 200 OK
pub async fn heartbeat() -> StatusCode {
    StatusCode::OK
}

/// Any method other than POST on the chat path.
pub async fn method_not_allowed() -> ProxyError {
    ProxyError::MethodNotAllowed
}

/// POST /api/chat
pub async fn chat_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> axum::response::Response {
    let request_id = Uuid::new_v4().to_string();

    let body = match axum::body::to_bytes(request.into_body(), state.max_body_bytes).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "failed to read request body");
            return ProxyError::InvalidRequest(format!("failed to read request body: {e}"))
                .into_response();
        }
    };

    let chat = match ChatRequest::parse(&body) {
        Ok(chat) => chat,
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "rejected chat request");
            return ProxyError::InvalidRequest(e.to_string()).into_response();
        }
    };

    tracing::info!(
        request_id = %request_id,
        bot_id = %chat.bot_id,
        has_conversation = chat.conversation_id.is_some(),
        query_chars = chat.query.chars().count(),
        "chat request"
    );

    match state.upstream.open_chat(chat, &request_id).await {
        Ok(resp) => {
            let mut response = Response::new(resp.body);
            *response.status_mut() = resp.status;
            *response.headers_mut() = resp.headers;
            response
        }
        Err(e) => {
            tracing::warn!(request_id = %request_id, error = %e, "chat request failed");
            e.into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// Path of the chat endpoint.
pub const CHAT_PATH: &str = "/api/chat";

/// Default listen address. Always localhost unless overridden.
pub const BIND_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 9810);

/// Build the axum router. The upstream client is injected.
pub fn build_router(upstream: Arc<dyn UpstreamClient>, max_body_bytes: usize) -> Router {
    let state = AppState {
        upstream,
        max_body_bytes,
    };

    Router::new()
        .route("/v1/heartbeat", get(heartbeat))
        .route(
            CHAT_PATH,
            post(chat_handler).fallback(method_not_allowed),
        )
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
