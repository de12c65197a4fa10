// Stream processor
//
// Takes the upstream byte stream, reassembles frames, transcodes each one,
// and forwards the surviving messages as outbound SSE frames. One spawned
// task per connection; the bounded output channel couples downstream
// consumption to upstream reads.

use super::classifier::FrameClassifier;
use super::extractor::ContentExtractor;
use super::filter::{admit, Verdict};
use super::reassembler::FrameReassembler;
use super::types::{NormalizedMessage, OutputEvent, PipelineState, SseFrame, StreamError};
use crate::config::StreamConfig;
use bytes::Bytes;
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

// ---------------------------------------------------------------------------
// Transcoder
// ---------------------------------------------------------------------------

/// Classify, extract and filter one frame.
///
/// Holds no per-connection state, so one instance is shared by every
/// connection and transcoding the same frame twice gives the same output.
pub struct Transcoder {
    classifier: Arc<dyn FrameClassifier>,
    extractor: ContentExtractor,
}

/// Result of transcoding one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Transcoded {
    Forward(Vec<NormalizedMessage>),
    Suppressed(&'static str),
    Dropped(String),
}

impl Transcoder {
    pub fn new(classifier: Arc<dyn FrameClassifier>, extractor: ContentExtractor) -> Self {
        Self {
            classifier,
            extractor,
        }
    }

    pub fn transcode(&self, frame: &SseFrame) -> Transcoded {
        let classified = self.classifier.classify(frame);
        let extracted = self.extractor.extract(&classified);
        match (admit(&classified), extracted) {
            (Verdict::Suppress(reason), _) => Transcoded::Suppressed(reason.as_str()),
            (Verdict::Forward, Err(e)) => Transcoded::Dropped(e.to_string()),
            (Verdict::Forward, Ok(messages)) => Transcoded::Forward(messages),
        }
    }

    /// The messages a frame forwards, if any.
    pub fn messages(&self, frame: &SseFrame) -> Vec<NormalizedMessage> {
        match self.transcode(frame) {
            Transcoded::Forward(messages) => messages,
            _ => Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// StreamProcessor
// ---------------------------------------------------------------------------

/// Runs one pipeline per upstream stream.
pub struct StreamProcessor {
    transcoder: Arc<Transcoder>,
    settings: StreamConfig,
}

impl StreamProcessor {
    pub fn new(transcoder: Arc<Transcoder>, settings: StreamConfig) -> Self {
        Self {
            transcoder,
            settings,
        }
    }

    /// Process an upstream byte stream into outbound SSE frames.
    ///
    /// Every item is one complete `data: ...\n\n` frame. An upstream error
    /// or idle timeout yields one `Err` and ends the stream. Dropping the
    /// returned stream aborts the upstream read and drops `input`.
    pub fn process<S, E>(
        &self,
        input: S,
        request_id: impl Into<String>,
    ) -> impl Stream<Item = Result<Bytes, StreamError>>
    where
        S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let pipeline = Pipeline {
            request_id: request_id.into(),
            transcoder: self.transcoder.clone(),
            reassembler: FrameReassembler::new(),
            settings: self.settings,
            state: PipelineState::AwaitingUpstream,
            counters: Counters::default(),
        };
        tokio::spawn(pipeline.run(input, tx));
        ReceiverStream::new(rx)
    }
}

// ---------------------------------------------------------------------------
// Per-connection pipeline
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Counters {
    chunks: u64,
    frames: u64,
    forwarded: u64,
    suppressed: u64,
    dropped: u64,
}

struct Pipeline {
    request_id: String,
    transcoder: Arc<Transcoder>,
    reassembler: FrameReassembler,
    settings: StreamConfig,
    state: PipelineState,
    counters: Counters,
}

/// Why the read loop stopped.
enum Exit {
    /// Upstream ended normally.
    Eof,
    /// The client went away.
    Disconnected,
    /// Terminal error, already delivered downstream if possible.
    Failed,
}

type Sender = mpsc::Sender<Result<Bytes, StreamError>>;

impl Pipeline {
    async fn run<S, E>(mut self, mut input: S, tx: Sender)
    where
        S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
        E: Display + Send + 'static,
    {
        let exit = loop {
            let next = tokio::select! {
                _ = tx.closed() => break Exit::Disconnected,
                next = tokio::time::timeout(self.settings.idle_timeout(), input.next()) => next,
            };

            match next {
                Err(_elapsed) => {
                    let err = StreamError::IdleTimeout(self.settings.idle_timeout_ms);
                    break self.fail(&tx, err).await;
                }
                Ok(None) => break Exit::Eof,
                Ok(Some(Err(e))) => {
                    let err = StreamError::Transport(e.to_string());
                    break self.fail(&tx, err).await;
                }
                Ok(Some(Ok(chunk))) => {
                    self.note_chunk();
                    if let Err(exit) = self.forward_chunk(&chunk, &tx).await {
                        break exit;
                    }
                }
            }
        };

        // Release the upstream connection before draining.
        drop(input);

        if matches!(exit, Exit::Eof) {
            self.transition(PipelineState::Draining);
            let residual = self.reassembler.finish();
            if !residual.is_empty() {
                tracing::debug!(
                    request_id = %self.request_id,
                    fragment_bytes = residual.fragment_bytes,
                    undecoded_bytes = residual.undecoded_bytes,
                    "discarding unterminated trailing line"
                );
            }
        } else if matches!(exit, Exit::Disconnected) {
            tracing::info!(request_id = %self.request_id, "client disconnected, upstream read aborted");
        }

        self.transition(PipelineState::Closed);
        tracing::info!(
            request_id = %self.request_id,
            chunks = self.counters.chunks,
            frames = self.counters.frames,
            forwarded = self.counters.forwarded,
            suppressed = self.counters.suppressed,
            dropped = self.counters.dropped,
            "stream closed"
        );
    }

    /// Reassemble one chunk and forward every message it completes, in order.
    async fn forward_chunk(&mut self, chunk: &[u8], tx: &Sender) -> Result<(), Exit> {
        for frame in self.reassembler.push(chunk) {
            self.counters.frames += 1;
            let messages = match self.transcoder.transcode(&frame) {
                Transcoded::Forward(messages) => messages,
                Transcoded::Suppressed(reason) => {
                    self.counters.suppressed += 1;
                    tracing::debug!(
                        request_id = %self.request_id,
                        event = frame.event.as_deref().unwrap_or(""),
                        reason,
                        "frame suppressed"
                    );
                    continue;
                }
                Transcoded::Dropped(reason) => {
                    self.counters.dropped += 1;
                    tracing::debug!(
                        request_id = %self.request_id,
                        event = frame.event.as_deref().unwrap_or(""),
                        %reason,
                        "frame dropped"
                    );
                    continue;
                }
            };

            for message in messages {
                let sse = match OutputEvent::from(message).to_sse() {
                    Ok(sse) => sse,
                    Err(e) => {
                        let err = StreamError::Serialize(e.to_string());
                        return Err(self.fail(tx, err).await);
                    }
                };
                // Awaiting capacity here is what stalls the upstream read.
                if tx.send(Ok(Bytes::from(sse))).await.is_err() {
                    return Err(Exit::Disconnected);
                }
                self.counters.forwarded += 1;
            }
        }
        Ok(())
    }

    async fn fail(&mut self, tx: &Sender, err: StreamError) -> Exit {
        tracing::warn!(
            request_id = %self.request_id,
            state = %self.state,
            error = %err,
            "stream terminated"
        );
        let _ = tx.send(Err(err)).await;
        Exit::Failed
    }

    /// Count a chunk; the first one moves the pipeline out of
    /// `AwaitingUpstream`.
    fn note_chunk(&mut self) {
        self.counters.chunks += 1;
        if self.state == PipelineState::AwaitingUpstream {
            self.transition(PipelineState::Streaming);
        }
    }

    fn transition(&mut self, next: PipelineState) {
        tracing::debug!(
            request_id = %self.request_id,
            from = %self.state,
            to = %next,
            "pipeline state"
        );
        self.state = next;
    }
}
