use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, StreamBody};
use hyper::Response;
use hyper::body::{Frame, Incoming};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error};

use crate::format::anthropic::{
    ContentDelta, StartedBlock, StreamEvent, stop_reason_to_finish_reason,
};
use crate::format::google::finish_reason_to_openai;
use crate::format::openai::{
    ChatCompletionChunk, ChunkChoice, ChunkDelta, FunctionCallDelta, ToolCallDelta,
};
use crate::format::response::unix_now;
use crate::models::Provider;
use crate::upstream::sse::{SseLineBuffer, decode_anthropic, decode_gemini};

/// Body type shared by every proxy response, buffered or streamed.
pub type ProxyBody = BoxBody<Bytes, Infallible>;

/// Frames queued ahead of a slow client before the upstream read suspends.
const CHANNEL_CAPACITY: usize = 64;

/// Which OpenAI streaming shape the client expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamShape {
    Chat,
    Completion,
}

/// Live bookkeeping for one streaming response.
#[derive(Debug)]
pub struct StreamState {
    pub completion_id: String,
    pub chunk_count: u64,
    pub role_frame_sent: bool,
    pub received_terminal_upstream: bool,
    pub final_frame_sent: bool,
    pub done_sentinel_sent: bool,
}

impl StreamState {
    fn new(shape: StreamShape) -> Self {
        Self {
            completion_id: new_completion_id(shape),
            chunk_count: 0,
            role_frame_sent: false,
            received_terminal_upstream: false,
            final_frame_sent: false,
            done_sentinel_sent: false,
        }
    }
}

pub fn new_completion_id(shape: StreamShape) -> String {
    let mut bytes = [0u8; 16];
    getrandom::fill(&mut bytes).expect("random bytes for completion id");
    let mut hex = String::with_capacity(32);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(hex, "{b:02x}");
    }
    match shape {
        StreamShape::Chat => format!("chatcmpl-{hex}"),
        StreamShape::Completion => format!("cmpl-{hex}"),
    }
}

type FrameSender = mpsc::Sender<Result<Frame<Bytes>, Infallible>>;

/// Writes OpenAI SSE frames. Every frame shares one completion id; each
/// `send` awaits channel capacity, which is the drain wait for slow clients.
/// A frame is enqueued whole or not at all.
pub struct FrameWriter {
    tx: FrameSender,
    pub state: StreamState,
    shape: StreamShape,
    model: String,
    created: i64,
    tool_call_emitted: bool,
}

impl FrameWriter {
    pub fn new(tx: FrameSender, shape: StreamShape, model: String) -> Self {
        Self {
            tx,
            state: StreamState::new(shape),
            shape,
            model,
            created: unix_now(),
            tool_call_emitted: false,
        }
    }

    fn chat_chunk(&self, delta: ChunkDelta, finish_reason: Option<String>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.state.completion_id.clone(),
            object: "chat.completion.chunk",
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }

    fn completion_chunk(&self, text: &str, finish_reason: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "id": self.state.completion_id,
            "object": "text_completion",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "text": text,
                "index": 0,
                "logprobs": null,
                "finish_reason": finish_reason,
            }],
        })
    }

    /// Returns false when the client is gone; callers abandon the stream.
    async fn send_raw(&mut self, payload: Bytes) -> bool {
        self.tx.send(Ok(Frame::data(payload))).await.is_ok()
    }

    async fn send_json(&mut self, value: &impl serde::Serialize) -> bool {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(_) => return true,
        };
        self.state.chunk_count += 1;
        self.send_raw(Bytes::from(format!("data: {json}\n\n"))).await
    }

    /// The opening frame of a chat stream: `delta.role = "assistant"`, no
    /// content. Legacy completions have no role concept and skip it.
    pub async fn send_role_frame(&mut self) -> bool {
        if self.shape == StreamShape::Completion {
            self.state.role_frame_sent = true;
            return true;
        }
        let chunk = self.chat_chunk(
            ChunkDelta {
                role: Some("assistant"),
                ..Default::default()
            },
            None,
        );
        let ok = self.send_json(&chunk).await;
        if ok {
            self.state.role_frame_sent = true;
        }
        ok
    }

    pub async fn send_content(&mut self, text: &str) -> bool {
        match self.shape {
            StreamShape::Chat => {
                let chunk = self.chat_chunk(
                    ChunkDelta {
                        content: Some(text.to_string()),
                        ..Default::default()
                    },
                    None,
                );
                self.send_json(&chunk).await
            }
            StreamShape::Completion => {
                let chunk = self.completion_chunk(text, None);
                self.send_json(&chunk).await
            }
        }
    }

    pub async fn send_tool_open(&mut self, id: &str, name: &str) -> bool {
        self.tool_call_emitted = true;
        let chunk = self.chat_chunk(
            ChunkDelta {
                tool_calls: Some(vec![ToolCallDelta {
                    index: 0,
                    id: Some(id.to_string()),
                    call_type: Some("function"),
                    function: FunctionCallDelta {
                        name: Some(name.to_string()),
                        arguments: Some(String::new()),
                    },
                }]),
                ..Default::default()
            },
            None,
        );
        self.send_json(&chunk).await
    }

    pub async fn send_tool_args(&mut self, partial_json: &str) -> bool {
        let chunk = self.chat_chunk(
            ChunkDelta {
                tool_calls: Some(vec![ToolCallDelta {
                    index: 0,
                    id: None,
                    call_type: None,
                    function: FunctionCallDelta {
                        name: None,
                        arguments: Some(partial_json.to_string()),
                    },
                }]),
                ..Default::default()
            },
            None,
        );
        self.send_json(&chunk).await
    }

    /// Terminal frame followed by the `[DONE]` sentinel. At most once.
    pub async fn finish(&mut self, stop_reason_hint: Option<String>) -> bool {
        if self.state.final_frame_sent {
            return true;
        }
        let reason = stop_reason_hint.unwrap_or_else(|| {
            if self.tool_call_emitted {
                "tool_calls".to_string()
            } else {
                "stop".to_string()
            }
        });

        let ok = match self.shape {
            StreamShape::Chat => {
                let chunk = self.chat_chunk(ChunkDelta::default(), Some(reason));
                self.send_json(&chunk).await
            }
            StreamShape::Completion => {
                let chunk = self.completion_chunk("", Some(&reason));
                self.send_json(&chunk).await
            }
        };
        if !ok {
            return false;
        }
        self.state.final_frame_sent = true;

        let ok = self.send_raw(Bytes::from_static(b"data: [DONE]\n\n")).await;
        if ok {
            self.state.done_sentinel_sent = true;
        }
        ok
    }
}

fn sse_response(rx: mpsc::Receiver<Result<Frame<Bytes>, Infallible>>) -> Response<ProxyBody> {
    let body = StreamBody::new(ReceiverStream::new(rx)).boxed();
    Response::builder()
        .status(200)
        .header("Content-Type", "text/event-stream")
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(body)
        .expect("static header set")
}

/// Translate an upstream event stream into an OpenAI SSE response.
///
/// Headers go out immediately; the translation task runs detached, bounded
/// by the per-request wall clock. Once headers are sent, faults and timeout
/// expiry close the connection without further frames — never a JSON error
/// body.
pub fn streaming_response(
    upstream: Incoming,
    provider: Provider,
    shape: StreamShape,
    model: String,
    request_id: String,
    timeout: Duration,
) -> Response<ProxyBody> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        translate_stream(upstream, tx, provider, shape, model, request_id, timeout).await;
    });
    sse_response(rx)
}

async fn translate_stream(
    mut upstream: Incoming,
    tx: FrameSender,
    provider: Provider,
    shape: StreamShape,
    model: String,
    request_id: String,
    timeout: Duration,
) {
    let deadline = Instant::now() + timeout;

    let mut writer = FrameWriter::new(tx, shape, model);
    if !writer.send_role_frame().await {
        debug!(request_id = %request_id, "Client disconnected before role frame");
        return;
    }

    let mut buffer = SseLineBuffer::new();
    let mut stop_reason_hint: Option<String> = None;

    loop {
        let frame = match tokio::time::timeout_at(deadline, upstream.frame()).await {
            Err(_) => {
                // Headers are already out, so expiry closes the stream
                // silently; the client observes a truncated stream.
                error!(
                    request_id = %request_id,
                    kind = "timeout",
                    timeout_secs = timeout.as_secs(),
                    "Wall-clock timeout expired mid-stream, closing without terminal frames"
                );
                return;
            }
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                // Mid-stream fault: log once with the request id, close the
                // connection, write nothing further.
                error!(
                    request_id = %request_id,
                    kind = "upstream_read",
                    error = %e,
                    "Stream fault, closing without terminal frames"
                );
                return;
            }
            Ok(None) => break,
        };

        let Some(data) = frame.data_ref() else {
            continue;
        };
        let chunk = String::from_utf8_lossy(data);

        for payload in buffer.feed(&chunk) {
            match provider {
                Provider::Anthropic => {
                    let Some(event) = decode_anthropic(&payload) else {
                        continue;
                    };
                    match apply_anthropic_event(&mut writer, event, &mut stop_reason_hint).await {
                        EventFlow::Continue => {}
                        EventFlow::Terminal => {
                            writer.state.received_terminal_upstream = true;
                        }
                        EventFlow::Fault { kind, message } => {
                            error!(
                                request_id = %request_id,
                                kind = %kind,
                                message = %message,
                                "Stream fault, closing without terminal frames"
                            );
                            return;
                        }
                        EventFlow::ClientGone => {
                            debug!(request_id = %request_id, "Client disconnected mid-stream");
                            return;
                        }
                    }
                }
                Provider::Google => {
                    let Some(chunk) = decode_gemini(&payload) else {
                        continue;
                    };
                    if let Some(reason) = chunk.finish_reason() {
                        stop_reason_hint = Some(finish_reason_to_openai(reason));
                    }
                    let text = chunk.first_candidate_text();
                    if !text.is_empty() && !writer.send_content(&text).await {
                        debug!(request_id = %request_id, "Client disconnected mid-stream");
                        return;
                    }
                }
                Provider::Imagen => {
                    // Imagen never streams; predict responses are buffered.
                }
            }
        }

        if writer.state.received_terminal_upstream {
            break;
        }
    }

    // Anthropic streams must close with message_stop; an end-of-body without
    // one is a truncated stream and gets the fault treatment. Gemini's
    // upstream end is its implicit terminal.
    let clean = match provider {
        Provider::Anthropic => writer.state.received_terminal_upstream,
        Provider::Google | Provider::Imagen => true,
    };

    if !clean {
        error!(
            request_id = %request_id,
            kind = "upstream_truncated",
            "Upstream ended without terminal event, closing without terminal frames"
        );
        return;
    }

    if !writer.finish(stop_reason_hint).await {
        debug!(request_id = %request_id, "Client disconnected before terminal frame");
    }
}

enum EventFlow {
    Continue,
    Terminal,
    Fault { kind: String, message: String },
    ClientGone,
}

async fn apply_anthropic_event(
    writer: &mut FrameWriter,
    event: StreamEvent,
    stop_reason_hint: &mut Option<String>,
) -> EventFlow {
    let sent = match event {
        StreamEvent::ContentBlockDelta { delta, .. } => match delta {
            ContentDelta::TextDelta { text } => writer.send_content(&text).await,
            ContentDelta::InputJsonDelta { partial_json } => {
                writer.send_tool_args(&partial_json).await
            }
            ContentDelta::Unknown => true,
        },
        StreamEvent::ContentBlockStart { content_block, .. } => match content_block {
            StartedBlock::ToolUse { id, name } => writer.send_tool_open(&id, &name).await,
            _ => true,
        },
        StreamEvent::MessageDelta { delta, .. } => {
            if let Some(reason) = delta.stop_reason {
                *stop_reason_hint = Some(stop_reason_to_finish_reason(&reason));
            }
            true
        }
        StreamEvent::MessageStop => return EventFlow::Terminal,
        StreamEvent::Error { error } => {
            return EventFlow::Fault {
                kind: error.error_type,
                message: error.message,
            };
        }
        StreamEvent::MessageStart { .. }
        | StreamEvent::ContentBlockStop { .. }
        | StreamEvent::Ping
        | StreamEvent::Unknown => true,
    };

    if sent {
        EventFlow::Continue
    } else {
        EventFlow::ClientGone
    }
}

/// Forward an upstream Anthropic SSE body to the client verbatim (messages
/// passthrough). Faults and wall-clock expiry close the stream silently, as
/// above.
pub fn passthrough_stream_response(
    upstream: Incoming,
    request_id: String,
    timeout: Duration,
) -> Response<ProxyBody> {
    let (tx, rx) = mpsc::channel::<Result<Frame<Bytes>, Infallible>>(CHANNEL_CAPACITY);

    tokio::spawn(async move {
        let deadline = Instant::now() + timeout;
        let mut upstream = upstream;
        loop {
            match tokio::time::timeout_at(deadline, upstream.frame()).await {
                Err(_) => {
                    error!(
                        request_id = %request_id,
                        kind = "timeout",
                        timeout_secs = timeout.as_secs(),
                        "Wall-clock timeout expired mid-passthrough, closing"
                    );
                    return;
                }
                Ok(Some(Ok(frame))) => {
                    let Some(data) = frame.data_ref() else {
                        continue;
                    };
                    if tx.send(Ok(Frame::data(data.clone()))).await.is_err() {
                        debug!(request_id = %request_id, "Client disconnected mid-passthrough");
                        return;
                    }
                }
                Ok(Some(Err(e))) => {
                    error!(
                        request_id = %request_id,
                        kind = "upstream_read",
                        error = %e,
                        "Passthrough stream fault, closing"
                    );
                    return;
                }
                Ok(None) => return,
            }
        }
    });

    sse_response(rx)
}
