// Copyright 2026 The Turnstream Project
// SPDX-License-Identifier: Apache-2.0

// Duplicate/noise filter
//
// A completed-turn frame repeats the text its deltas already delivered, so
// it is only forwarded when it carries object-string content, which no delta
// ever does. Pure function of one classified frame.

use super::types::{ClassifiedFrame, ContentEncoding, FrameKind};

/// Whether a frame's extracted messages reach the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Forward,
    Suppress(SuppressReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// Plain text of a completed turn; the deltas already carried it.
    DuplicateOfDeltas,
    /// Object-string content on a delta; the completed frame carries it whole.
    PartialObjectString,
    ToolOrSystemNoise,
    Unknown,
}

impl SuppressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressReason::DuplicateOfDeltas => "duplicate_of_deltas",
            SuppressReason::PartialObjectString => "partial_object_string",
            SuppressReason::ToolOrSystemNoise => "tool_or_system_noise",
            SuppressReason::Unknown => "unknown",
        }
    }
}

pub fn admit(frame: &ClassifiedFrame) -> Verdict {
    match (frame.kind, frame.encoding()) {
        (FrameKind::StreamingTextDelta, ContentEncoding::PlainText) => Verdict::Forward,
        (FrameKind::StreamingTextDelta, ContentEncoding::ObjectString) => {
            Verdict::Suppress(SuppressReason::PartialObjectString)
        }
        (FrameKind::CompletedTurnSummary, ContentEncoding::ObjectString) => Verdict::Forward,
        (FrameKind::CompletedTurnSummary, ContentEncoding::PlainText) => {
            Verdict::Suppress(SuppressReason::DuplicateOfDeltas)
        }
        (FrameKind::ToolOrSystemNoise, _) => Verdict::Suppress(SuppressReason::ToolOrSystemNoise),
        (FrameKind::Unknown, _) => Verdict::Suppress(SuppressReason::Unknown),
    }
}
