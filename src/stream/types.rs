// Copyright 2026 The Turnstream Project
// SPDX-License-Identifier: Apache-2.0

// Stream types
//
// Frames, classification, normalized messages, the outbound wire schema,
// and the errors that can occur while transcoding a stream.

use serde::Serialize;
use std::fmt;

// ---------------------------------------------------------------------------
// SSE frame representation
// ---------------------------------------------------------------------------

/// One reassembled `data:` line, paired with the event name that was current
/// on the connection when it arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    /// The most recent `event:` value seen on this connection, if any.
    pub event: Option<String>,
    /// The raw data payload (everything after `data:`, trimmed).
    pub data: String,
}

// ---------------------------------------------------------------------------
// Frame classification
// ---------------------------------------------------------------------------

/// What a frame represents, decided from its event name and payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Incremental answer text.
    StreamingTextDelta,
    /// Terminal frame of one response; repeats the deltas, sometimes with
    /// results that no delta carried.
    CompletedTurnSummary,
    /// Follow-up suggestions, verbose traces, tool calls and their outputs.
    ToolOrSystemNoise,
    /// Heartbeats, partial artifacts, records without content.
    Unknown,
}

/// How the `content` field of a frame is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentEncoding {
    /// Human-visible text, forwarded as-is.
    PlainText,
    /// A serialized JSON document that needs a second decode pass.
    ObjectString,
}

/// A frame after classification. Carries the fields the extractor needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifiedFrame {
    pub kind: FrameKind,
    /// The `content` value, empty when the frame had none.
    pub raw_content: String,
    pub content_type: Option<String>,
    pub message_type: Option<String>,
}

impl ClassifiedFrame {
    /// A frame that carries nothing forwardable.
    pub fn unknown() -> Self {
        Self {
            kind: FrameKind::Unknown,
            raw_content: String::new(),
            content_type: None,
            message_type: None,
        }
    }

    /// Encoding of `raw_content`.
    ///
    /// Upstream marks object-string content with `content_type`, but some
    /// variants omit the marker and only the serialized envelope gives it away.
    pub fn encoding(&self) -> ContentEncoding {
        if self.content_type.as_deref() == Some(OBJECT_STRING_CONTENT_TYPE)
            || self.raw_content.trim_start().starts_with(OBJECT_STRING_ENVELOPE_PREFIX)
        {
            ContentEncoding::ObjectString
        } else {
            ContentEncoding::PlainText
        }
    }
}

/// `content_type` value marking object-string content.
pub const OBJECT_STRING_CONTENT_TYPE: &str = "object_string";

/// Prefix of object-string content that arrives without a `content_type`.
pub const OBJECT_STRING_ENVELOPE_PREFIX: &str = "{\"content_type\"";

/// Object-string content is decoded at most this many times.
pub const MAX_UNWRAP_DEPTH: usize = 1;

// ---------------------------------------------------------------------------
// Normalized messages and the outbound schema
// ---------------------------------------------------------------------------

/// A file reference extracted from object-string content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileAttachment {
    pub url: String,
    pub mime_type: String,
    pub name: String,
}

/// A human-visible message, forwarded once and forgotten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedMessage {
    TextDelta(String),
    FileAttachment(FileAttachment),
}

/// Event name of every outbound frame.
pub const OUTBOUND_EVENT: &str = "message.delta";

/// Outbound frame, serialized as `data: <json>\n\n`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputEvent {
    pub event: &'static str,
    pub message: OutboundMessage,
}

/// Body of an outbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OutboundMessage {
    Text {
        content: String,
    },
    File {
        url: String,
        mime_type: String,
        name: String,
    },
}

impl From<NormalizedMessage> for OutputEvent {
    fn from(message: NormalizedMessage) -> Self {
        let message = match message {
            NormalizedMessage::TextDelta(content) => OutboundMessage::Text { content },
            NormalizedMessage::FileAttachment(file) => OutboundMessage::File {
                url: file.url,
                mime_type: file.mime_type,
                name: file.name,
            },
        };
        Self {
            event: OUTBOUND_EVENT,
            message,
        }
    }
}

impl OutputEvent {
    /// Serialize as one SSE frame.
    pub fn to_sse(&self) -> Result<String, serde_json::Error> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

/// Lifecycle of one connection's pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    AwaitingUpstream,
    Streaming,
    Draining,
    Closed,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::AwaitingUpstream => "awaiting_upstream",
            PipelineState::Streaming => "streaming",
            PipelineState::Draining => "draining",
            PipelineState::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a single frame produced no output. Never reaches the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContentError {
    /// The data payload is not a JSON record.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    /// Object-string content did not decode into a known shape.
    #[error("unsupported content shape: {0}")]
    UnsupportedContentShape(String),
    /// Content is structured data or carries an internal marker.
    #[error("noise: {0}")]
    Noise(String),
}

/// Terminal errors that end a connection's stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The upstream connection failed mid-stream.
    #[error("upstream stream failed: {0}")]
    Transport(String),
    /// No upstream bytes arrived within the idle timeout.
    #[error("upstream stream idle for more than {0} ms")]
    IdleTimeout(u64),
    /// An outbound frame could not be serialized.
    #[error("failed to serialize outbound frame: {0}")]
    Serialize(String),
}
