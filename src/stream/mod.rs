// Copyright 2026 The Turnstream Project
// SPDX-License-Identifier: Apache-2.0

// Streaming transcoder
//
// Responsibilities:
// - Reassemble upstream SSE lines across arbitrary chunk boundaries
// - Classify frames by event name and payload shape
// - Extract answer text and file attachments, decoding object-string
//   content at most once
// - Suppress completed-turn duplicates, tool/system noise and internal markers
// - Forward a stable `message.delta` schema, one flushed frame per message
// - Bounded output channel: a slow client stalls the upstream read

mod classifier;
mod decoder;
mod extractor;
mod filter;
mod processor;
mod reassembler;
mod types;

pub use classifier::{ChatFrameClassifier, FrameClassifier};
pub use decoder::Utf8Decoder;
pub use extractor::{ContentExtractor, NoiseRules};
pub use filter::{admit, SuppressReason, Verdict};
pub use processor::{StreamProcessor, Transcoded, Transcoder};
pub use reassembler::{FrameReassembler, Residual};
pub use types::{
    ClassifiedFrame, ContentEncoding, ContentError, FileAttachment, FrameKind, NormalizedMessage,
    OutboundMessage, OutputEvent, PipelineState, SseFrame, StreamError, MAX_UNWRAP_DEPTH,
    OUTBOUND_EVENT,
};

use crate::config::NoiseConfig;
use std::sync::Arc;

/// Transcoder for the upstream chat event stream with the given noise rules.
pub fn chat_transcoder(noise: &NoiseConfig) -> Transcoder {
    Transcoder::new(
        Arc::new(ChatFrameClassifier::new(noise.message_types.clone())),
        ContentExtractor::new(NoiseRules::from_config(noise)),
    )
}

#[cfg(test)]
mod tests;
