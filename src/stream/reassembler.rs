// Copyright 2026 The Turnstream Project
// SPDX-License-Identifier: Apache-2.0

// Frame reassembly
//
// Turns arbitrarily split byte chunks into complete `data:` frames. A line
// is only interpreted once its newline has arrived; the unterminated tail
// waits in the pending buffer for the next chunk.

use super::decoder::Utf8Decoder;
use super::types::SseFrame;

/// Per-connection line reassembler.
///
/// Owns the pending line fragment and the current event register. One
/// instance per connection, never shared.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    decoder: Utf8Decoder,
    /// Text after the last newline seen so far.
    pending: String,
    /// Most recent `event:` value. Persists until the next `event:` line.
    current_event: Option<String>,
}

/// What was thrown away when the upstream ended mid-line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Residual {
    /// Bytes of the unterminated final line.
    pub fragment_bytes: usize,
    /// Bytes of an incomplete trailing code point.
    pub undecoded_bytes: usize,
}

impl Residual {
    pub fn is_empty(&self) -> bool {
        self.fragment_bytes == 0 && self.undecoded_bytes == 0
    }
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning the frames completed by it in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        let text = self.decoder.decode(chunk);
        self.pending.push_str(&text);

        let Some(last_newline) = self.pending.rfind('\n') else {
            return Vec::new();
        };
        let tail = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, tail);

        complete
            .split('\n')
            .filter_map(|line| self.process_line(line))
            .collect()
    }

    /// End of upstream. The unterminated fragment is incomplete by
    /// definition and is discarded, never parsed.
    pub fn finish(&mut self) -> Residual {
        Residual {
            fragment_bytes: std::mem::take(&mut self.pending).len(),
            undecoded_bytes: self.decoder.finish(),
        }
    }

    /// The event name a `data:` line arriving now would be paired with.
    pub fn current_event(&self) -> Option<&str> {
        self.current_event.as_deref()
    }

    /// Number of buffered bytes waiting for a newline.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Some(event) = trimmed.strip_prefix("event:") {
            let event = event.trim();
            self.current_event = (!event.is_empty()).then(|| event.to_string());
            return None;
        }

        // `id:`, `retry:` and `:` comments carry nothing we forward.
        let data = trimmed.strip_prefix("data:")?;
        Some(SseFrame {
            event: self.current_event.clone(),
            data: data.trim().to_string(),
        })
    }
}
