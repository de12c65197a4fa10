// Copyright 2026 The Turnstream Project
// SPDX-License-Identifier: Apache-2.0

// Pipeline tests for the streaming transcoder
//
// Tests cover:
//  1. A recorded turn transcodes to deltas + unwrapped completed results
//  2. Output is identical however the input is split into chunks
//  3. Completed plain text never duplicates delta text
//  4. Object-string results unwrap to text then files, in order
//  5. Frames carrying internal markers are never forwarded
//  6. A line cut mid-chunk produces nothing until its newline arrives
//  7. Upstream EOF with a truncated final line closes cleanly
//  8. Transcoding is free of hidden state
//  9. Transport errors and idle timeouts end the stream with one error
// 10. A stalled client stalls the upstream read; a gone client aborts it

use super::*;
use crate::config::{NoiseConfig, StreamConfig};
use bytes::Bytes;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::time::{self, Duration};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const DELTA: &str = "conversation.message.delta";
const COMPLETED: &str = "conversation.message.completed";

/// One full upstream turn: chat bookkeeping, two answer deltas, the plain
/// completed duplicate, an object-string result, verbose and follow-up
/// noise, and the terminal markers.
const RECORDED_TURN: &str = concat!(
    "event:conversation.chat.created\n",
    "data:{\"id\":\"chat_1\",\"conversation_id\":\"conv_1\",\"status\":\"created\"}\n\n",
    "event:conversation.chat.in_progress\n",
    "data:{\"id\":\"chat_1\",\"conversation_id\":\"conv_1\",\"status\":\"in_progress\"}\n\n",
    "event:conversation.message.delta\n",
    "data:{\"id\":\"msg_1\",\"role\":\"assistant\",\"type\":\"answer\",\"content\":\"Hello\",\"content_type\":\"text\",\"chat_id\":\"chat_1\"}\n\n",
    "event:conversation.message.delta\n",
    "data:{\"id\":\"msg_1\",\"role\":\"assistant\",\"type\":\"answer\",\"content\":\" 世界 🙂\",\"content_type\":\"text\",\"chat_id\":\"chat_1\"}\n\n",
    "event:conversation.message.completed\n",
    "data:{\"id\":\"msg_1\",\"role\":\"assistant\",\"type\":\"answer\",\"content\":\"Hello 世界 🙂\",\"content_type\":\"text\",\"chat_id\":\"chat_1\"}\n\n",
    "event:conversation.message.completed\n",
    "data:{\"id\":\"msg_2\",\"role\":\"assistant\",\"type\":\"answer\",\"content\":\"{\\\"data\\\":\\\"**Result**\\\",\\\"files\\\":[{\\\"url\\\":\\\"https://x/y.png\\\",\\\"mime_type\\\":\\\"image/png\\\",\\\"name\\\":\\\"y.png\\\"}]}\",\"content_type\":\"object_string\",\"chat_id\":\"chat_1\"}\n\n",
    "event:conversation.message.completed\n",
    "data:{\"id\":\"msg_3\",\"role\":\"assistant\",\"type\":\"verbose\",\"content\":\"{\\\"msg_type\\\":\\\"generate_answer_finish\\\"}\",\"content_type\":\"text\",\"chat_id\":\"chat_1\"}\n\n",
    "event:conversation.message.completed\n",
    "data:{\"id\":\"msg_4\",\"role\":\"assistant\",\"type\":\"follow_up\",\"content\":\"Want to know more?\",\"content_type\":\"text\",\"chat_id\":\"chat_1\"}\n\n",
    "event:conversation.chat.completed\n",
    "data:{\"id\":\"chat_1\",\"conversation_id\":\"conv_1\",\"status\":\"completed\"}\n\n",
    "event:done\n",
    "data:\"[DONE]\"\n\n",
);

fn text(s: &str) -> NormalizedMessage {
    NormalizedMessage::TextDelta(s.to_string())
}

fn png() -> NormalizedMessage {
    NormalizedMessage::FileAttachment(FileAttachment {
        url: "https://x/y.png".to_string(),
        mime_type: "image/png".to_string(),
        name: "y.png".to_string(),
    })
}

fn expected_turn() -> Vec<NormalizedMessage> {
    vec![text("Hello"), text(" 世界 🙂"), text("**Result**"), png()]
}

fn transcoder() -> Arc<Transcoder> {
    Arc::new(chat_transcoder(&NoiseConfig::default()))
}

fn processor_with(settings: StreamConfig) -> StreamProcessor {
    StreamProcessor::new(transcoder(), settings)
}

fn processor() -> StreamProcessor {
    processor_with(StreamConfig::default())
}

fn data_line(event: &str, record: serde_json::Value) -> String {
    format!("event:{event}\ndata:{record}\n\n")
}

/// Run bytes through a reassembler and transcoder without the async
/// machinery, one chunk per slice.
fn transcode_chunks(chunks: &[&[u8]]) -> Vec<NormalizedMessage> {
    let transcoder = transcoder();
    let mut reassembler = FrameReassembler::new();
    let mut out = Vec::new();
    for chunk in chunks {
        for frame in reassembler.push(chunk) {
            out.extend(transcoder.messages(&frame));
        }
    }
    reassembler.finish();
    out
}

// ---------------------------------------------------------------------------
// Stream helpers
// ---------------------------------------------------------------------------

/// Split `input` into chunks of `size` bytes, ignoring char boundaries.
fn chunked(
    input: &str,
    size: usize,
) -> impl tokio_stream::Stream<Item = Result<Bytes, Infallible>> + Unpin + Send {
    let chunks: Vec<Result<Bytes, Infallible>> = input
        .as_bytes()
        .chunks(size)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    tokio_stream::iter(chunks)
}

/// Build a stream backed by a channel for time-controlled tests.
fn channel_stream(
    capacity: usize,
) -> (
    tokio::sync::mpsc::Sender<Result<Bytes, Infallible>>,
    ReceiverStream<Result<Bytes, Infallible>>,
) {
    let (tx, rx) = tokio::sync::mpsc::channel(capacity);
    (tx, ReceiverStream::new(rx))
}

/// Decode one outbound SSE frame back into a message.
fn decode_frame(frame: &[u8]) -> NormalizedMessage {
    let text = std::str::from_utf8(frame).expect("outbound frame is UTF-8");
    let json = text
        .strip_prefix("data: ")
        .and_then(|rest| rest.strip_suffix("\n\n"))
        .unwrap_or_else(|| panic!("not an SSE data frame: {text:?}"));
    let value: serde_json::Value = serde_json::from_str(json).expect("frame payload is JSON");
    assert_eq!(value["event"], OUTBOUND_EVENT);
    let message = &value["message"];
    match message["type"].as_str() {
        Some("text") => text_message(message["content"].as_str().unwrap_or_default()),
        Some("file") => NormalizedMessage::FileAttachment(FileAttachment {
            url: message["url"].as_str().unwrap_or_default().to_string(),
            mime_type: message["mime_type"].as_str().unwrap_or_default().to_string(),
            name: message["name"].as_str().unwrap_or_default().to_string(),
        }),
        other => panic!("unexpected message type {other:?}"),
    }
}

fn text_message(s: &str) -> NormalizedMessage {
    NormalizedMessage::TextDelta(s.to_string())
}

/// Collect all output: decoded messages plus the terminal error, if any.
async fn collect_output(
    stream: impl tokio_stream::Stream<Item = Result<Bytes, StreamError>>,
) -> (Vec<NormalizedMessage>, Option<StreamError>) {
    let mut messages = Vec::new();
    let mut error = None;
    tokio::pin!(stream);
    while let Some(item) = stream.next().await {
        match item {
            Ok(frame) => {
                assert!(error.is_none(), "output after terminal error");
                messages.push(decode_frame(&frame));
            }
            Err(e) => error = Some(e),
        }
    }
    (messages, error)
}

// ---------------------------------------------------------------------------
// Test 1: recorded turn
// ---------------------------------------------------------------------------

#[tokio::test]
async fn recorded_turn_forwards_deltas_and_unwrapped_result() {
    let (messages, error) =
        collect_output(processor().process(chunked(RECORDED_TURN, 4096), "req-1")).await;
    assert_eq!(messages, expected_turn());
    assert!(error.is_none());
}

#[tokio::test]
async fn each_message_is_its_own_frame() {
    let stream = processor().process(chunked(RECORDED_TURN, 4096), "req-1");
    tokio::pin!(stream);
    let mut frames = 0;
    while let Some(item) = stream.next().await {
        let frame = item.unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert_eq!(text.matches("data: ").count(), 1, "{text:?}");
        assert!(text.ends_with("\n\n"));
        frames += 1;
    }
    assert_eq!(frames, 4);
}

// ---------------------------------------------------------------------------
// Test 2: chunking invariance
// ---------------------------------------------------------------------------

#[test]
fn every_two_way_split_yields_identical_messages() {
    let bytes = RECORDED_TURN.as_bytes();
    for cut in 0..=bytes.len() {
        let (a, b) = bytes.split_at(cut);
        assert_eq!(
            transcode_chunks(&[a, b]),
            expected_turn(),
            "split at byte {cut}"
        );
    }
}

#[test]
fn single_byte_chunks_yield_identical_messages() {
    let chunks: Vec<&[u8]> = RECORDED_TURN.as_bytes().chunks(1).collect();
    assert_eq!(transcode_chunks(&chunks), expected_turn());
}

#[tokio::test]
async fn chunk_size_does_not_change_processor_output() {
    for size in [1, 2, 3, 5, 7, 13, 64, 100, 257] {
        let (messages, error) =
            collect_output(processor().process(chunked(RECORDED_TURN, size), "req")).await;
        assert_eq!(messages, expected_turn(), "chunk size {size}");
        assert!(error.is_none());
    }
}

// ---------------------------------------------------------------------------
// Test 3: dedup law
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_plain_text_is_not_re_emitted() {
    let input = [
        data_line(
            DELTA,
            serde_json::json!({"type": "answer", "content": "Hello", "content_type": "text"}),
        ),
        data_line(
            COMPLETED,
            serde_json::json!({"type": "answer", "content": "Hello world", "content_type": "text"}),
        ),
    ]
    .concat();

    let (messages, _) = collect_output(processor().process(chunked(&input, 4096), "req")).await;
    assert_eq!(messages, vec![text("Hello")]);
}

// ---------------------------------------------------------------------------
// Test 4: object-string unwrap
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_object_string_unwraps_to_text_then_file() {
    let inner = serde_json::json!({
        "data": "**Result**",
        "files": [{"url": "https://x/y.png", "mime_type": "image/png", "name": "y.png"}]
    });
    let input = data_line(
        COMPLETED,
        serde_json::json!({
            "type": "answer",
            "content": inner.to_string(),
            "content_type": "object_string"
        }),
    );

    let (messages, _) = collect_output(processor().process(chunked(&input, 4096), "req")).await;
    assert_eq!(messages, vec![text("**Result**"), png()]);
}

#[test]
fn delta_object_string_is_suppressed_and_completed_carries_it() {
    let content = r#"{"data":"Chart ready"}"#;
    let record = serde_json::json!({
        "type": "answer",
        "content": content,
        "content_type": "object_string"
    });
    let t = transcoder();
    let delta = SseFrame {
        event: Some(DELTA.to_string()),
        data: record.to_string(),
    };
    let completed = SseFrame {
        event: Some(COMPLETED.to_string()),
        data: record.to_string(),
    };

    assert_eq!(t.transcode(&delta), Transcoded::Suppressed("partial_object_string"));
    assert_eq!(t.messages(&completed), vec![text("Chart ready")]);
}

#[test]
fn unparseable_object_string_is_never_forwarded_as_text() {
    let frame = SseFrame {
        event: Some(COMPLETED.to_string()),
        data: serde_json::json!({
            "type": "answer",
            "content": "{\"data\": \"cut off",
            "content_type": "object_string"
        })
        .to_string(),
    };
    assert!(matches!(transcoder().transcode(&frame), Transcoded::Dropped(_)));
}

// ---------------------------------------------------------------------------
// Test 5: noise suppression
// ---------------------------------------------------------------------------

#[test]
fn internal_markers_are_never_forwarded() {
    let t = transcoder();
    for content in [
        "<tool_call>{\"name\":\"search\"}</tool_call>",
        "thinking <log>plugin invoked</log>",
        "<card_template id=\"3\">",
        "<|FunctionCallBegin|>[]<|FunctionCallEnd|>",
    ] {
        for event in [DELTA, COMPLETED] {
            let frame = SseFrame {
                event: Some(event.to_string()),
                data: serde_json::json!({
                    "type": "answer",
                    "content": content,
                    "content_type": "text"
                })
                .to_string(),
            };
            assert!(t.messages(&frame).is_empty(), "{event}: {content}");
        }
    }
}

#[test]
fn markers_inside_object_string_text_are_dropped() {
    let frame = SseFrame {
        event: Some(COMPLETED.to_string()),
        data: serde_json::json!({
            "type": "answer",
            "content": "{\"data\":\"<tool_call>x</tool_call>\"}",
            "content_type": "object_string"
        })
        .to_string(),
    };
    assert!(transcoder().messages(&frame).is_empty());
}

#[test]
fn tool_and_system_noise_is_suppressed() {
    let t = transcoder();
    for message_type in ["follow_up", "verbose", "function_call", "tool_response"] {
        let frame = SseFrame {
            event: Some(DELTA.to_string()),
            data: serde_json::json!({"type": message_type, "content": "x"}).to_string(),
        };
        assert_eq!(
            t.transcode(&frame),
            Transcoded::Suppressed("tool_or_system_noise"),
            "{message_type}"
        );
    }
}

// ---------------------------------------------------------------------------
// Test 6: split-line recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn line_cut_inside_string_waits_for_remaining_bytes() {
    let line = data_line(
        DELTA,
        serde_json::json!({"type": "answer", "content": "split \"here\" ok", "content_type": "text"}),
    );
    let cut = line.find("here").unwrap();
    let (first, rest) = line.split_at(cut);

    let (tx, input) = channel_stream(4);
    let stream = processor().process(input, "req");
    tokio::pin!(stream);

    tx.send(Ok(Bytes::from(first.to_string()))).await.unwrap();
    let nothing = time::timeout(Duration::from_millis(50), stream.next()).await;
    assert!(nothing.is_err(), "no output before the newline arrives");

    tx.send(Ok(Bytes::from(rest.to_string()))).await.unwrap();
    let frame = stream.next().await.unwrap().unwrap();
    assert_eq!(decode_frame(&frame), text("split \"here\" ok"));

    drop(tx);
    assert!(stream.next().await.is_none(), "exactly one message");
}

// ---------------------------------------------------------------------------
// Test 7: clean termination
// ---------------------------------------------------------------------------

#[tokio::test]
async fn eof_with_truncated_line_closes_without_error() {
    let input = format!(
        "{}event:{DELTA}\ndata:{{\"type\":\"answer\",\"content\":\"never finish",
        data_line(
            DELTA,
            serde_json::json!({"type": "answer", "content": "kept", "content_type": "text"}),
        )
    );
    let (messages, error) = collect_output(processor().process(chunked(&input, 16), "req")).await;
    assert_eq!(messages, vec![text("kept")]);
    assert!(error.is_none());
}

#[tokio::test]
async fn empty_upstream_closes_without_output() {
    let (messages, error) = collect_output(processor().process(chunked("", 16), "req")).await;
    assert!(messages.is_empty());
    assert!(error.is_none());
}

// ---------------------------------------------------------------------------
// Test 8: idempotence
// ---------------------------------------------------------------------------

#[test]
fn transcoding_the_same_frame_twice_is_identical() {
    let t = transcoder();
    let mut reassembler = FrameReassembler::new();
    for frame in reassembler.push(RECORDED_TURN.as_bytes()) {
        assert_eq!(t.transcode(&frame), t.transcode(&frame));
    }
}

// ---------------------------------------------------------------------------
// Test 9: terminal errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transport_error_ends_stream_with_error() {
    let first = data_line(
        DELTA,
        serde_json::json!({"type": "answer", "content": "partial", "content_type": "text"}),
    );
    let input = tokio_stream::iter(vec![
        Ok(Bytes::from(first)),
        Err("connection reset by peer".to_string()),
        Ok(Bytes::from_static(b"data: never read\n")),
    ]);

    let (messages, error) = collect_output(processor().process(input, "req")).await;
    assert_eq!(messages, vec![text("partial")]);
    assert_eq!(
        error,
        Some(StreamError::Transport("connection reset by peer".to_string()))
    );
}

#[tokio::test]
async fn idle_upstream_times_out() {
    let (_tx, input) = channel_stream(1);
    let settings = StreamConfig {
        idle_timeout_ms: 30,
        ..StreamConfig::default()
    };
    let (messages, error) =
        collect_output(processor_with(settings).process(input, "req")).await;
    assert!(messages.is_empty());
    assert_eq!(error, Some(StreamError::IdleTimeout(30)));
}

// ---------------------------------------------------------------------------
// Test 10: backpressure and cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stalled_client_stalls_upstream_reads() {
    let settings = StreamConfig {
        channel_capacity: 1,
        ..StreamConfig::default()
    };
    let (tx, input) = channel_stream(1);
    let stream = processor_with(settings).process(input, "req");
    tokio::pin!(stream);

    let delta = |n: usize| {
        Ok(Bytes::from(data_line(
            DELTA,
            serde_json::json!({"type": "answer", "content": format!("m{n}"), "content_type": "text"}),
        )))
    };

    // Nobody reads the output: one frame fills the output channel, one more
    // is held by the blocked send, one sits in the input channel.
    let mut accepted = 0;
    for n in 0..16 {
        match time::timeout(Duration::from_millis(50), tx.send(delta(n))).await {
            Ok(Ok(())) => accepted += 1,
            _ => break,
        }
    }
    assert!(accepted < 16, "upstream kept being read without a consumer");

    // Draining the output releases the upstream again, in order.
    drop(tx);
    let (messages, error) = collect_output(stream).await;
    let expected: Vec<_> = (0..accepted).map(|n| text(&format!("m{n}"))).collect();
    assert_eq!(messages, expected);
    assert!(error.is_none());
}

#[tokio::test]
async fn client_disconnect_releases_upstream() {
    let (tx, input) = channel_stream(1);
    let stream = processor().process(input, "req");
    drop(stream);

    // The pipeline drops its end of the upstream once it sees the client gone.
    time::timeout(Duration::from_secs(1), tx.closed())
        .await
        .expect("upstream should be released after client disconnect");
}

// ---------------------------------------------------------------------------
// Test 11: independent connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_connections_do_not_share_event_state() {
    let p = Arc::new(processor());

    // Connection A leaves its register on `completed`; B only ever sends
    // deltas without an event line after its first.
    let a = format!(
        "event:{COMPLETED}\ndata:{}\n\n",
        serde_json::json!({"type": "answer", "content": "dup", "content_type": "text"})
    );
    let b = format!(
        "event:{DELTA}\ndata:{}\n\ndata:{}\n\n",
        serde_json::json!({"type": "answer", "content": "b1", "content_type": "text"}),
        serde_json::json!({"type": "answer", "content": "b2", "content_type": "text"})
    );

    let mut handles = Vec::new();
    for (i, input) in [a, b].into_iter().enumerate() {
        let p = p.clone();
        handles.push(tokio::spawn(async move {
            collect_output(p.process(chunked(&input, 3), format!("req-{i}"))).await
        }));
    }

    let (a_out, _) = handles.remove(0).await.unwrap();
    let (b_out, _) = handles.remove(0).await.unwrap();
    assert!(a_out.is_empty());
    assert_eq!(b_out, vec![text("b1"), text("b2")]);
}
