// Engine integration
//
// Opens the upstream chat stream for one request and pipes it through the
// transcoder:
// - Resolve the API token (config literal or environment, per request)
// - Build the upstream body with a synthetic user id
// - POST with bearer auth, accept an event stream
// - Non-2xx: echo the upstream status and body text
// - 2xx: StreamProcessor -> SSE response body

use crate::config::{Config, UpstreamConfig};
use crate::message::{ChatRequest, UpstreamChatBody};
use crate::proxy::{ProxyError, ProxyResponse, UpstreamClient};
use crate::stream::{chat_transcoder, StreamProcessor, Transcoder};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{ACCEPT, AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use bytes::{Bytes, BytesMut};
use futures_util::stream::{Stream, StreamExt, TryStreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upstream error bodies beyond this are truncated before being echoed.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

#[async_trait]
pub trait HttpSender: Send + Sync {
    /// Send a request and return once the response head arrives.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Supplies the upstream API token.
pub trait CredentialProvider: Send + Sync {
    /// The token to use for the next request, if one is configured.
    fn api_token(&self) -> Option<String>;
    /// Where the token is expected to come from, for error messages.
    fn describe_source(&self) -> String;
}

// ---------------------------------------------------------------------------
// Transport types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Bound on waiting for the response head; the body is unbounded.
    pub timeout_ms: u64,
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, HttpError>> + Send>>;

pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream request timed out: {0}")]
    Timeout(String),
}

// ---------------------------------------------------------------------------
// Engine dependencies
// ---------------------------------------------------------------------------

pub struct EngineDeps {
    pub config: Arc<Config>,
    pub http: Arc<dyn HttpSender>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub transcoder: Arc<Transcoder>,
}

// ---------------------------------------------------------------------------
// ChatEngine
// ---------------------------------------------------------------------------

/// Upstream client that opens the chat stream and transcodes it.
pub struct ChatEngine {
    deps: EngineDeps,
    processor: StreamProcessor,
}

impl ChatEngine {
    pub fn new_with(deps: EngineDeps) -> Self {
        let processor = StreamProcessor::new(deps.transcoder.clone(), deps.config.stream);
        Self { deps, processor }
    }

    fn build_request(&self, request: ChatRequest, token: &str) -> Result<HttpRequest, ProxyError> {
        let upstream = &self.deps.config.upstream;
        let body = UpstreamChatBody::new(
            request,
            &upstream.user_id_prefix,
            upstream.auto_save_history,
        );
        let body = serde_json::to_vec(&body)
            .map_err(|e| ProxyError::InvalidRequest(format!("failed to encode upstream body: {e}")))?;

        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
            ProxyError::MissingCredential("API token is not a valid header value".to_string())
        })?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        Ok(HttpRequest {
            url: upstream.chat_url(),
            headers,
            body: Bytes::from(body),
            timeout_ms: upstream.timeout_ms,
        })
    }

    fn stream_response(&self, upstream: HttpResponse, request_id: &str) -> ProxyResponse {
        let output = self.processor.process(upstream.body, request_id.to_string());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        ProxyResponse {
            status: StatusCode::OK,
            headers,
            body: Body::from_stream(output),
        }
    }
}

#[async_trait]
impl UpstreamClient for ChatEngine {
    async fn open_chat(
        &self,
        request: ChatRequest,
        request_id: &str,
    ) -> Result<ProxyResponse, ProxyError> {
        let token = self.deps.credentials.api_token().ok_or_else(|| {
            ProxyError::MissingCredential(format!(
                "no API token configured ({})",
                self.deps.credentials.describe_source()
            ))
        })?;

        let bot_id = request.bot_id.clone();
        let http_request = self.build_request(request, &token)?;

        let start = Instant::now();
        let upstream = self.deps.http.send(http_request).await.map_err(|e| {
            tracing::warn!(request_id = %request_id, bot_id = %bot_id, error = %e, "upstream open failed");
            match e {
                HttpError::Timeout(msg) => ProxyError::UpstreamTimeout(msg),
                HttpError::Transport(msg) => ProxyError::UpstreamFailure(msg),
            }
        })?;

        let content_type = upstream
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        tracing::info!(
            request_id = %request_id,
            bot_id = %bot_id,
            status = upstream.status.as_u16(),
            content_type,
            latency_ms = start.elapsed().as_millis() as u64,
            "upstream opened"
        );

        if upstream.status.is_success() && !is_event_stream(&upstream.headers) {
            tracing::debug!(request_id = %request_id, content_type, "upstream success without event-stream content type");
        }

        if !upstream.status.is_success() {
            let status = upstream.status;
            let body = read_error_body(upstream.body).await;
            tracing::warn!(
                request_id = %request_id,
                status = status.as_u16(),
                body_bytes = body.len(),
                "upstream rejected chat request"
            );
            return Err(ProxyError::UpstreamStatus { status, body });
        }

        Ok(self.stream_response(upstream, request_id))
    }
}

/// Whether the upstream declared an SSE body.
fn is_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("text/event-stream"))
}

/// Read an upstream error body as text, up to `MAX_ERROR_BODY_BYTES`.
async fn read_error_body(mut body: ByteStream) -> String {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(chunk) => {
                let room = MAX_ERROR_BODY_BYTES - buf.len();
                buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
                if buf.len() >= MAX_ERROR_BODY_BYTES {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "upstream error body cut short");
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

// ---------------------------------------------------------------------------
// Credentials from config and environment
// ---------------------------------------------------------------------------

/// Literal token from the config file, else an environment variable read on
/// every request so a rotated key takes effect without a restart.
pub struct EnvCredentials {
    literal: Option<String>,
    env_var: String,
}

impl EnvCredentials {
    pub fn new(literal: Option<String>, env_var: impl Into<String>) -> Self {
        Self {
            literal,
            env_var: env_var.into(),
        }
    }

    pub fn from_config(upstream: &UpstreamConfig) -> Self {
        Self::new(upstream.api_token.clone(), upstream.api_token_env.clone())
    }
}

impl CredentialProvider for EnvCredentials {
    fn api_token(&self) -> Option<String> {
        self.literal
            .clone()
            .or_else(|| std::env::var(&self.env_var).ok())
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    }

    fn describe_source(&self) -> String {
        if self.literal.is_some() {
            "upstream.api_token".to_string()
        } else {
            format!("set {}", self.env_var)
        }
    }
}

// ---------------------------------------------------------------------------
// Reqwest HTTP sender
// ---------------------------------------------------------------------------

pub struct ReqwestHttpSender {
    client: reqwest::Client,
}

impl ReqwestHttpSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpSender for ReqwestHttpSender {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let req = self
            .client
            .post(&request.url)
            .headers(request.headers)
            .body(request.body);

        // Only the head is bounded; a reqwest request timeout would also cut
        // off long-running streams.
        let resp = tokio::time::timeout(Duration::from_millis(request.timeout_ms), req.send())
            .await
            .map_err(|_| HttpError::Timeout(format!("no response within {} ms", request.timeout_ms)))?
            .map_err(|e| {
                if e.is_timeout() {
                    HttpError::Timeout(e.to_string())
                } else {
                    HttpError::Transport(e.to_string())
                }
            })?;

        let status = resp.status();
        let headers = resp.headers().clone();
        let stream = resp
            .bytes_stream()
            .map_err(|e| HttpError::Transport(e.to_string()));

        Ok(HttpResponse {
            status,
            headers,
            body: Box::pin(stream),
        })
    }
}

// ---------------------------------------------------------------------------
// Public factory for the default engine
// ---------------------------------------------------------------------------

pub fn build_chat_engine(config: Arc<Config>) -> ChatEngine {
    let deps = EngineDeps {
        http: Arc::new(ReqwestHttpSender::new(reqwest::Client::new())),
        credentials: Arc::new(EnvCredentials::from_config(&config.upstream)),
        transcoder: Arc::new(chat_transcoder(&config.noise)),
        config,
    };

    ChatEngine::new_with(deps)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
