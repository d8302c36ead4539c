use std::time::{SystemTime, UNIX_EPOCH};

use crate::format::anthropic::{ContentBlock, MessagesResponse, stop_reason_to_finish_reason};
use crate::format::google::{GenerateContentResponse, finish_reason_to_openai};
use crate::format::imagen::PredictResponse;
use crate::format::openai::{
    ChatCompletionResponse, ChatUsage, Choice, CompletionChoice, CompletionResponse, FunctionCall,
    ImageData, ImagesResponse, ResponseMessage, ToolCall,
};

pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Translate a non-streaming Anthropic response into OpenAI chat shape.
pub fn anthropic_to_chat(
    response: &MessagesResponse,
    model: &str,
    completion_id: &str,
) -> ChatCompletionResponse {
    let mut text = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();

    for block in &response.content {
        match block {
            ContentBlock::Text { text: t } => text.push_str(t),
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(ToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_default(),
                    },
                });
            }
            _ => {}
        }
    }

    let finish_reason = response
        .stop_reason
        .as_deref()
        .map(stop_reason_to_finish_reason);

    ChatCompletionResponse {
        id: completion_id.to_string(),
        object: "chat.completion",
        created: unix_now(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant",
                content: if text.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(text)
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason,
            logprobs: None,
        }],
        usage: Some(ChatUsage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
        }),
    }
}

/// Same translation, legacy completions shape.
pub fn anthropic_to_completion(
    response: &MessagesResponse,
    model: &str,
    completion_id: &str,
) -> CompletionResponse {
    let text: String = response
        .content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();

    CompletionResponse {
        id: completion_id.to_string(),
        object: "text_completion",
        created: unix_now(),
        model: model.to_string(),
        choices: vec![CompletionChoice {
            text,
            index: 0,
            logprobs: None,
            finish_reason: response
                .stop_reason
                .as_deref()
                .map(stop_reason_to_finish_reason),
        }],
        usage: Some(ChatUsage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
        }),
    }
}

/// Translate a Gemini generateContent response into OpenAI chat shape.
pub fn gemini_to_chat(
    response: &GenerateContentResponse,
    model: &str,
    completion_id: &str,
) -> ChatCompletionResponse {
    let text = response.first_candidate_text();
    let finish_reason = response
        .finish_reason()
        .map(finish_reason_to_openai)
        .or(Some("stop".to_string()));

    let usage = response.usage_metadata.as_ref().map(|u| ChatUsage {
        prompt_tokens: u.prompt_token_count,
        completion_tokens: u.candidates_token_count,
        total_tokens: u.total_token_count,
    });

    ChatCompletionResponse {
        id: completion_id.to_string(),
        object: "chat.completion",
        created: unix_now(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant",
                content: Some(text),
                tool_calls: None,
            },
            finish_reason,
            logprobs: None,
        }],
        usage,
    }
}

/// Translate an Imagen :predict response into OpenAI images shape; the
/// original prompt is echoed as `revised_prompt`.
pub fn imagen_to_images(response: &PredictResponse, prompt: &str) -> ImagesResponse {
    ImagesResponse {
        created: unix_now(),
        data: response
            .predictions
            .iter()
            .map(|p| ImageData {
                b64_json: p.bytes_base64_encoded.clone(),
                revised_prompt: Some(prompt.to_string()),
            })
            .collect(),
    }
}
