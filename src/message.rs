// Wire types for the chat endpoint
//
// `ChatRequest` is what the browser client posts; `UpstreamChatBody` is what
// goes to the upstream chat API. The synthetic user id ties one conversation
// to one upstream user without exposing anything about the client.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Inbound chat request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub query: String,
    pub bot_id: String,
    pub conversation_id: Option<String>,
}

/// Inbound body as sent; required fields are checked after parsing.
#[derive(Debug, Deserialize)]
struct RawChatRequest {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
}

/// Why an inbound body was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error("request body is empty")]
    EmptyBody,
    #[error("request body is not valid JSON: {0}")]
    MalformedJson(String),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

impl ChatRequest {
    /// Parse and validate an inbound body.
    ///
    /// `query` and `bot_id` must be present and non-blank. A blank
    /// `conversation_id` is treated as absent.
    pub fn parse(body: &[u8]) -> Result<Self, RequestError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(RequestError::EmptyBody);
        }
        let raw: RawChatRequest = serde_json::from_slice(body)
            .map_err(|e| RequestError::MalformedJson(e.to_string()))?;

        Ok(Self {
            query: required(raw.query, "query")?,
            bot_id: required(raw.bot_id, "bot_id")?,
            conversation_id: raw.conversation_id.filter(|id| !id.trim().is_empty()),
        })
    }
}

fn required(value: Option<String>, field: &'static str) -> Result<String, RequestError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or(RequestError::MissingField(field))
}

// ---------------------------------------------------------------------------
// Upstream body
// ---------------------------------------------------------------------------

/// One turn appended to the upstream conversation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdditionalMessage {
    pub role: &'static str,
    pub content: String,
    pub content_type: &'static str,
}

impl AdditionalMessage {
    pub fn user_text(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
            content_type: "text",
        }
    }
}

/// Body of the upstream streaming chat request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpstreamChatBody {
    pub bot_id: String,
    pub user_id: String,
    pub stream: bool,
    pub auto_save_history: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub additional_messages: Vec<AdditionalMessage>,
}

impl UpstreamChatBody {
    pub fn new(request: ChatRequest, user_id_prefix: &str, auto_save_history: bool) -> Self {
        let user_id = synthetic_user_id(user_id_prefix, request.conversation_id.as_deref());
        Self {
            bot_id: request.bot_id,
            user_id,
            stream: true,
            auto_save_history,
            conversation_id: request.conversation_id,
            additional_messages: vec![AdditionalMessage::user_text(request.query)],
        }
    }
}

/// Upstream user id for a session.
///
/// Stable for a given conversation (`<prefix>_<16 hex of sha256>`), random
/// for a fresh one.
pub fn synthetic_user_id(prefix: &str, conversation_id: Option<&str>) -> String {
    match conversation_id {
        Some(id) => {
            let digest = Sha256::digest(id.as_bytes());
            let hex: String = digest.iter().take(8).map(|b| format!("{b:02x}")).collect();
            format!("{prefix}_{hex}")
        }
        None => format!("{prefix}_{}", uuid::Uuid::new_v4().simple()),
    }
}
