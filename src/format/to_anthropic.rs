use crate::format::anthropic::{
    ANTHROPIC_VERSION, ContentBlock, ImageSource, Message, MessageContent, Role, Tool, ToolChoice,
    VertexMessagesRequest,
};
use crate::format::openai::{
    ChatCompletionRequest, ChatContent, ChatContentPart, ChatMessage, CompletionRequest,
    ToolChoice as OpenAiToolChoice,
};

const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Translate an OpenAI chat request into an Anthropic-on-Vertex body.
///
/// System-role messages are merged (in order, double-newline separated) into
/// the top-level `system` string and removed from `messages`. Never fails:
/// malformed pieces degrade to empty text rather than erroring.
pub fn chat_to_anthropic(request: &ChatCompletionRequest) -> VertexMessagesRequest {
    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<Message> = Vec::new();

    for msg in &request.messages {
        match msg.role.as_str() {
            "system" => {
                if let Some(content) = &msg.content {
                    system_parts.push(content.to_text());
                }
            }
            "assistant" => messages.push(convert_assistant(msg)),
            "tool" => {
                if let Some(tool_call_id) = &msg.tool_call_id {
                    let text = msg
                        .content
                        .as_ref()
                        .map(|c| c.to_text())
                        .unwrap_or_default();
                    messages.push(Message {
                        role: Role::User,
                        content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                            tool_use_id: tool_call_id.clone(),
                            content: serde_json::Value::String(text),
                        }]),
                    });
                }
            }
            // "user" and anything unrecognized carry through as user turns.
            _ => {
                let content = msg
                    .content
                    .as_ref()
                    .map(convert_user_content)
                    .unwrap_or_else(|| MessageContent::Text(String::new()));
                messages.push(Message {
                    role: Role::User,
                    content,
                });
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| Tool {
                tool_type: "custom".to_string(),
                name: t.function.name.clone(),
                description: t.function.description.clone(),
                input_schema: t.function.parameters.clone().unwrap_or_else(|| {
                    serde_json::json!({"type": "object", "properties": {}})
                }),
            })
            .collect()
    });

    let tool_choice = request.tool_choice.as_ref().and_then(convert_tool_choice);

    VertexMessagesRequest {
        anthropic_version: ANTHROPIC_VERSION.to_string(),
        messages,
        max_tokens: request
            .max_completion_tokens
            .or(request.max_tokens)
            .unwrap_or(DEFAULT_MAX_TOKENS),
        system,
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop.as_ref().map(|s| s.to_vec()),
        stream: if request.stream { Some(true) } else { None },
        tools,
        tool_choice,
    }
}

fn convert_assistant(msg: &ChatMessage) -> Message {
    let mut blocks: Vec<ContentBlock> = Vec::new();

    if let Some(content) = &msg.content {
        let text = content.to_text();
        if !text.is_empty() {
            blocks.push(ContentBlock::Text { text });
        }
    }

    if let Some(tool_calls) = &msg.tool_calls {
        for tc in tool_calls {
            let input: serde_json::Value = serde_json::from_str(&tc.function.arguments)
                .unwrap_or_else(|_| serde_json::json!({}));
            blocks.push(ContentBlock::ToolUse {
                id: tc.id.clone(),
                name: tc.function.name.clone(),
                input,
            });
        }
    }

    if blocks.is_empty() {
        return Message {
            role: Role::Assistant,
            content: MessageContent::Text(String::new()),
        };
    }

    // A plain text turn stays a plain string; block form only when needed.
    if blocks.len() == 1
        && let ContentBlock::Text { text } = &blocks[0]
    {
        return Message {
            role: Role::Assistant,
            content: MessageContent::Text(text.clone()),
        };
    }

    Message {
        role: Role::Assistant,
        content: MessageContent::Blocks(blocks),
    }
}

fn convert_user_content(content: &ChatContent) -> MessageContent {
    match content {
        ChatContent::Text(s) => MessageContent::Text(s.clone()),
        ChatContent::Parts(parts) => {
            let blocks: Vec<ContentBlock> = parts
                .iter()
                .map(|p| match p {
                    ChatContentPart::Text { text } => ContentBlock::Text { text: text.clone() },
                    ChatContentPart::ImageUrl { image_url } => {
                        if let Some((media_type, data)) = parse_data_url(&image_url.url) {
                            ContentBlock::Image {
                                source: ImageSource::Base64 { media_type, data },
                            }
                        } else {
                            ContentBlock::Image {
                                source: ImageSource::Url {
                                    url: image_url.url.clone(),
                                },
                            }
                        }
                    }
                })
                .collect();
            MessageContent::Blocks(blocks)
        }
    }
}

fn convert_tool_choice(choice: &OpenAiToolChoice) -> Option<ToolChoice> {
    match choice {
        OpenAiToolChoice::Mode(mode) => match mode.as_str() {
            "auto" => Some(ToolChoice {
                choice_type: "auto".to_string(),
                name: None,
            }),
            "none" => Some(ToolChoice {
                choice_type: "none".to_string(),
                name: None,
            }),
            "required" => Some(ToolChoice {
                choice_type: "any".to_string(),
                name: None,
            }),
            _ => None,
        },
        OpenAiToolChoice::Function { function, .. } => Some(ToolChoice {
            choice_type: "tool".to_string(),
            name: Some(function.name.clone()),
        }),
    }
}

/// Split a `data:` URI into media type and base64 payload.
pub fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (mime_part, data) = rest.split_once(',')?;
    let media_type = mime_part.split(';').next().unwrap_or("image/png");
    Some((media_type.to_string(), data.to_string()))
}

/// Lift a legacy completions request into chat shape: the prompt becomes a
/// single user message; everything downstream is the chat path.
pub fn completion_to_chat(request: &CompletionRequest) -> ChatCompletionRequest {
    ChatCompletionRequest {
        model: request.model.clone(),
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: Some(ChatContent::Text(
                request
                    .prompt
                    .as_ref()
                    .map(|p| p.to_text())
                    .unwrap_or_default(),
            )),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }],
        max_tokens: request.max_tokens,
        max_completion_tokens: None,
        temperature: request.temperature,
        top_p: None,
        stream: request.stream,
        stop: request.stop.clone(),
        tools: None,
        tool_choice: None,
        n: None,
        user: None,
    }
}

/// Prepare an inbound Anthropic messages body for Vertex passthrough: the
/// model moves into the URL, `anthropic_version` is required in the body.
pub fn prepare_messages_passthrough(body: &mut serde_json::Value, streaming: bool) {
    if let Some(obj) = body.as_object_mut() {
        obj.remove("model");
        obj.insert(
            "anthropic_version".to_string(),
            serde_json::Value::String(ANTHROPIC_VERSION.to_string()),
        );
        if !obj.contains_key("max_tokens") {
            obj.insert(
                "max_tokens".to_string(),
                serde_json::Value::from(DEFAULT_MAX_TOKENS),
            );
        }
        if streaming {
            obj.insert("stream".to_string(), serde_json::Value::Bool(true));
        } else {
            obj.remove("stream");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::openai::{FunctionCall, ImageUrl, StopSequence, ToolCall};

    fn user_text(text: &str) -> ChatMessage {
        ChatMessage {
            role: "user".to_string(),
            content: Some(ChatContent::Text(text.to_string())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn base_request(messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "sonnet".to_string(),
            messages,
            max_tokens: Some(100),
            max_completion_tokens: None,
            temperature: Some(0.7),
            top_p: None,
            stream: false,
            stop: None,
            tools: None,
            tool_choice: None,
            n: None,
            user: None,
        }
    }

    #[test]
    fn test_system_messages_merged() {
        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: Some(ChatContent::Text("Be brief.".to_string())),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            },
            user_text("hi"),
            ChatMessage {
                role: "system".to_string(),
                content: Some(ChatContent::Text("Use French.".to_string())),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            },
        ];
        let req = base_request(messages);
        let out = chat_to_anthropic(&req);

        assert_eq!(out.system.as_deref(), Some("Be brief.\n\nUse French."));
        // System turns are removed from the message list.
        assert_eq!(out.messages.len(), 1);
        assert!(matches!(out.messages[0].role, Role::User));
        assert_eq!(out.anthropic_version, ANTHROPIC_VERSION);
    }

    #[test]
    fn test_tool_role_becomes_tool_result() {
        let req = base_request(vec![
            user_text("call something"),
            ChatMessage {
                role: "tool".to_string(),
                content: Some(ChatContent::Text("42".to_string())),
                name: None,
                tool_calls: None,
                tool_call_id: Some("call_1".to_string()),
            },
        ]);
        let out = chat_to_anthropic(&req);
        assert_eq!(out.messages.len(), 2);
        match &out.messages[1].content {
            MessageContent::Blocks(blocks) => match &blocks[0] {
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                } => {
                    assert_eq!(tool_use_id, "call_1");
                    assert_eq!(content, &serde_json::json!("42"));
                }
                other => panic!("expected tool_result, got {other:?}"),
            },
            _ => panic!("expected block content"),
        }
        assert!(matches!(out.messages[1].role, Role::User));
    }

    #[test]
    fn test_assistant_tool_calls_become_tool_use() {
        let req = base_request(vec![ChatMessage {
            role: "assistant".to_string(),
            content: Some(ChatContent::Text("Let me check.".to_string())),
            name: None,
            tool_calls: Some(vec![ToolCall {
                id: "call_9".to_string(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: "lookup".to_string(),
                    arguments: r#"{"q":"rust"}"#.to_string(),
                },
            }]),
            tool_call_id: None,
        }]);
        let out = chat_to_anthropic(&req);
        match &out.messages[0].content {
            MessageContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert!(matches!(&blocks[0], ContentBlock::Text { text } if text == "Let me check."));
                match &blocks[1] {
                    ContentBlock::ToolUse { id, name, input } => {
                        assert_eq!(id, "call_9");
                        assert_eq!(name, "lookup");
                        assert_eq!(input["q"], "rust");
                    }
                    other => panic!("expected tool_use, got {other:?}"),
                }
            }
            _ => panic!("expected block content"),
        }
    }

    #[test]
    fn test_data_url_image_inlined() {
        let req = base_request(vec![ChatMessage {
            role: "user".to_string(),
            content: Some(ChatContent::Parts(vec![
                ChatContentPart::Text {
                    text: "what is this".to_string(),
                },
                ChatContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "data:image/jpeg;base64,/9j/4AAQ".to_string(),
                    },
                },
            ])),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }]);
        let out = chat_to_anthropic(&req);
        match &out.messages[0].content {
            MessageContent::Blocks(blocks) => match &blocks[1] {
                ContentBlock::Image {
                    source: ImageSource::Base64 { media_type, data },
                } => {
                    assert_eq!(media_type, "image/jpeg");
                    assert_eq!(data, "/9j/4AAQ");
                }
                other => panic!("expected base64 image, got {other:?}"),
            },
            _ => panic!("expected block content"),
        }
    }

    #[test]
    fn test_tools_and_tool_choice() {
        let mut req = base_request(vec![user_text("hi")]);
        req.tools = Some(vec![crate::format::openai::ToolDef {
            tool_type: "function".to_string(),
            function: crate::format::openai::FunctionDef {
                name: "get_weather".to_string(),
                description: Some("weather lookup".to_string()),
                parameters: Some(serde_json::json!({"type":"object","properties":{"city":{"type":"string"}}})),
            },
        }]);
        req.tool_choice = Some(OpenAiToolChoice::Function {
            choice_type: "function".to_string(),
            function: crate::format::openai::ToolChoiceFunction {
                name: "get_weather".to_string(),
            },
        });

        let out = chat_to_anthropic(&req);
        let tools = out.tools.unwrap();
        assert_eq!(tools[0].tool_type, "custom");
        assert_eq!(tools[0].name, "get_weather");
        assert_eq!(tools[0].input_schema["type"], "object");

        let choice = out.tool_choice.unwrap();
        assert_eq!(choice.choice_type, "tool");
        assert_eq!(choice.name.as_deref(), Some("get_weather"));
    }

    #[test]
    fn test_tool_choice_auto_passthrough() {
        let mut req = base_request(vec![user_text("hi")]);
        req.tool_choice = Some(OpenAiToolChoice::Mode("auto".to_string()));
        let out = chat_to_anthropic(&req);
        assert_eq!(out.tool_choice.unwrap().choice_type, "auto");
    }

    #[test]
    fn test_stop_sequences_and_stream_flag() {
        let mut req = base_request(vec![user_text("hi")]);
        req.stop = Some(StopSequence::Single("END".to_string()));
        req.stream = true;
        let out = chat_to_anthropic(&req);
        assert_eq!(out.stop_sequences.unwrap(), vec!["END"]);
        assert_eq!(out.stream, Some(true));
    }

    #[test]
    fn test_completion_lifting() {
        let req = CompletionRequest {
            model: "sonnet".to_string(),
            prompt: Some(crate::format::openai::Prompt::Text("Say hi".to_string())),
            max_tokens: Some(16),
            temperature: None,
            stream: false,
            stop: None,
        };
        let chat = completion_to_chat(&req);
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.messages[0].role, "user");
        assert_eq!(
            chat.messages[0].content.as_ref().unwrap().to_text(),
            "Say hi"
        );
        assert_eq!(chat.max_tokens, Some(16));
    }

    #[test]
    fn test_passthrough_preparation() {
        let mut body = serde_json::json!({
            "model": "claude-sonnet-4-5@20250929",
            "messages": [{"role":"user","content":"hi"}],
            "max_tokens": 128
        });
        prepare_messages_passthrough(&mut body, true);
        assert!(body.get("model").is_none());
        assert_eq!(body["anthropic_version"], ANTHROPIC_VERSION);
        assert_eq!(body["max_tokens"], 128);
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn test_passthrough_default_max_tokens() {
        let mut body = serde_json::json!({
            "model": "sonnet",
            "messages": []
        });
        prepare_messages_passthrough(&mut body, false);
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert!(body.get("stream").is_none());
    }
}
