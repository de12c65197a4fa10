// Copyright 2026 The Turnstream Project
// SPDX-License-Identifier: Apache-2.0

// Frame classifier
//
// Decides what each reassembled frame is: an answer delta, a completed-turn
// summary, tool/system noise, or nothing forwardable. Upstream variants put
// the interesting fields either on the record itself or on a nested
// `message` record, under more than one name; one ordered list of shape
// rules resolves them.

use serde_json::Value;

use super::types::{ClassifiedFrame, FrameKind, SseFrame};

// ---------------------------------------------------------------------------
// Trait: FrameClassifier
// ---------------------------------------------------------------------------

/// Labels a frame by event kind and payload shape.
///
/// Implementations must be stateless: classifying the same frame twice
/// yields the same result.
pub trait FrameClassifier: Send + Sync {
    fn classify(&self, frame: &SseFrame) -> ClassifiedFrame;
}

// ---------------------------------------------------------------------------
// Shape rules
// ---------------------------------------------------------------------------

/// A place in the record where payload fields may live.
struct ShapeRule {
    name: &'static str,
    scope: fn(&Value) -> Option<&Value>,
}

fn top_level(record: &Value) -> Option<&Value> {
    Some(record)
}

fn nested_message(record: &Value) -> Option<&Value> {
    record.get("message").filter(|m| m.is_object())
}

/// Evaluated top to bottom, first non-empty match wins.
const SHAPE_RULES: &[ShapeRule] = &[
    ShapeRule {
        name: "top_level",
        scope: top_level,
    },
    ShapeRule {
        name: "nested_message",
        scope: nested_message,
    },
];

const CONTENT_FIELDS: &[&str] = &["content"];
const CONTENT_TYPE_FIELDS: &[&str] = &["content_type"];
const MESSAGE_TYPE_FIELDS: &[&str] = &["type", "message_type"];

/// Resolve a string field through the shape rules. Empty strings count as
/// absent so a blank top-level value falls through to the nested record.
fn lookup<'a>(record: &'a Value, aliases: &[&str]) -> Option<&'a str> {
    SHAPE_RULES.iter().find_map(|rule| {
        let scope = (rule.scope)(record)?;
        let value = aliases
            .iter()
            .find_map(|alias| scope.get(*alias)?.as_str().filter(|s| !s.is_empty()));
        if value.is_some() {
            tracing::trace!(rule = rule.name, field = aliases[0], "shape rule matched");
        }
        value
    })
}

// ---------------------------------------------------------------------------
// Chat classifier
// ---------------------------------------------------------------------------

/// Classifies frames of the upstream chat event stream.
///
/// - `type` in the noise list -> `ToolOrSystemNoise`, whatever the event
/// - missing or empty `content` -> `Unknown`
/// - event ending in `delta` -> `StreamingTextDelta`
/// - event ending in `completed` -> `CompletedTurnSummary`
/// - anything else, or a payload that is not a JSON record -> `Unknown`
pub struct ChatFrameClassifier {
    noise_message_types: Vec<String>,
}

impl ChatFrameClassifier {
    pub fn new(noise_message_types: Vec<String>) -> Self {
        Self {
            noise_message_types,
        }
    }

    fn is_noise_type(&self, message_type: Option<&str>) -> bool {
        message_type.is_some_and(|t| self.noise_message_types.iter().any(|n| n == t))
    }
}

impl FrameClassifier for ChatFrameClassifier {
    fn classify(&self, frame: &SseFrame) -> ClassifiedFrame {
        // Heartbeats, `[DONE]` markers and partial artifacts land here.
        let record: Value = match serde_json::from_str(frame.data.trim()) {
            Ok(v @ Value::Object(_)) => v,
            _ => return ClassifiedFrame::unknown(),
        };

        // Some variants inline the event name in the record instead of
        // sending an `event:` line.
        let event = frame
            .event
            .as_deref()
            .or_else(|| record.get("event").and_then(Value::as_str))
            .unwrap_or("");

        let content = lookup(&record, CONTENT_FIELDS);
        let content_type = lookup(&record, CONTENT_TYPE_FIELDS);
        let message_type = lookup(&record, MESSAGE_TYPE_FIELDS);

        let kind = if self.is_noise_type(message_type) {
            FrameKind::ToolOrSystemNoise
        } else if content.is_none() {
            FrameKind::Unknown
        } else if event.ends_with("delta") {
            FrameKind::StreamingTextDelta
        } else if event.ends_with("completed") {
            FrameKind::CompletedTurnSummary
        } else {
            FrameKind::Unknown
        };

        ClassifiedFrame {
            kind,
            raw_content: content.unwrap_or_default().to_string(),
            content_type: content_type.map(String::from),
            message_type: message_type.map(String::from),
        }
    }
}
