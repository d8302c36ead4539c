use crate::format::anthropic::StreamEvent;
use crate::format::google::GenerateContentResponse;
use tracing::debug;

/// Incremental splitter for newline-delimited SSE records.
///
/// Feed raw body chunks; complete `data:` payloads come back in arrival
/// order. Partial records stay buffered until their terminator arrives.
pub struct SseLineBuffer {
    buffer: String,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self {
            buffer: String::with_capacity(4096),
        }
    }

    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let mut payloads = Vec::new();
        loop {
            // Records end on a blank line; tolerate CRLF framing.
            let boundary = self
                .buffer
                .find("\r\n\r\n")
                .map(|p| (p, 4))
                .or_else(|| self.buffer.find("\n\n").map(|p| (p, 2)));

            let Some((pos, skip)) = boundary else {
                break;
            };

            let record = self.buffer[..pos].to_string();
            self.buffer.drain(..pos + skip);

            for line in record.lines() {
                let data = line
                    .strip_prefix("data: ")
                    .or_else(|| line.strip_prefix("data:"));
                if let Some(data) = data {
                    let data = data.trim();
                    if !data.is_empty() {
                        payloads.push(data.to_string());
                    }
                }
            }
        }

        payloads
    }

    /// Whatever is left when the stream ends; a non-empty remainder means the
    /// upstream was cut mid-record.
    pub fn remainder(&self) -> &str {
        &self.buffer
    }
}

impl Default for SseLineBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode one Anthropic SSE payload. Unparseable payloads are dropped with a
/// debug log rather than failing the stream.
pub fn decode_anthropic(data: &str) -> Option<StreamEvent> {
    match serde_json::from_str(data) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, data = %data.chars().take(200).collect::<String>(), "Unparseable Anthropic SSE payload");
            None
        }
    }
}

/// Decode one Gemini streaming chunk (same shape as generateContent).
pub fn decode_gemini(data: &str) -> Option<GenerateContentResponse> {
    match serde_json::from_str(data) {
        Ok(chunk) => Some(chunk),
        Err(e) => {
            debug!(error = %e, data = %data.chars().take(200).collect::<String>(), "Unparseable Gemini SSE payload");
            None
        }
    }
}
