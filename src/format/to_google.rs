use crate::format::google::{
    Content, FunctionDeclaration, GenerateContentRequest, GenerationConfig, GoogleFunctionCall,
    FunctionCallPart, FunctionResponsePart, GoogleFunctionResponse, GoogleTool, InlineData,
    InlineDataPart, Part, TextPart,
};
use crate::format::openai::{ChatCompletionRequest, ChatContent, ChatContentPart};
use crate::format::to_anthropic::parse_data_url;

const DEFAULT_MAX_TOKENS: u32 = 8192;

/// Placeholder substituted for images that could not be fetched and inlined.
pub const IMAGE_PLACEHOLDER: &str = "[Image could not be loaded]";

/// Translate an OpenAI chat request into a Gemini generateContent body.
///
/// Remote image URLs must already have been inlined as `data:` URIs by the
/// dispatcher's pre-pass; anything still remote here degrades to the
/// placeholder text part.
pub fn chat_to_gemini(request: &ChatCompletionRequest) -> GenerateContentRequest {
    let mut system_parts: Vec<Part> = Vec::new();
    let mut contents: Vec<Content> = Vec::new();

    for msg in &request.messages {
        match msg.role.as_str() {
            "system" => {
                if let Some(content) = &msg.content {
                    system_parts.push(Part::Text(TextPart {
                        text: content.to_text(),
                    }));
                }
            }
            "assistant" => {
                let mut parts: Vec<Part> = Vec::new();
                if let Some(content) = &msg.content {
                    let text = content.to_text();
                    if !text.is_empty() {
                        parts.push(Part::Text(TextPart { text }));
                    }
                }
                if let Some(tool_calls) = &msg.tool_calls {
                    for tc in tool_calls {
                        let args: serde_json::Value = serde_json::from_str(&tc.function.arguments)
                            .unwrap_or_else(|_| serde_json::json!({}));
                        parts.push(Part::FunctionCall(FunctionCallPart {
                            function_call: GoogleFunctionCall {
                                name: tc.function.name.clone(),
                                args,
                            },
                        }));
                    }
                }
                if parts.is_empty() {
                    parts.push(Part::Text(TextPart {
                        text: String::new(),
                    }));
                }
                contents.push(Content {
                    role: Some("model".to_string()),
                    parts,
                });
            }
            "tool" => {
                let text = msg
                    .content
                    .as_ref()
                    .map(|c| c.to_text())
                    .unwrap_or_default();
                let name = msg
                    .name
                    .clone()
                    .or_else(|| msg.tool_call_id.clone())
                    .unwrap_or_else(|| "tool".to_string());
                contents.push(Content {
                    role: Some("user".to_string()),
                    parts: vec![Part::FunctionResponse(FunctionResponsePart {
                        function_response: GoogleFunctionResponse {
                            name,
                            response: serde_json::json!({ "result": text }),
                        },
                    })],
                });
            }
            _ => {
                contents.push(Content {
                    role: Some("user".to_string()),
                    parts: msg
                        .content
                        .as_ref()
                        .map(convert_user_parts)
                        .unwrap_or_else(|| {
                            vec![Part::Text(TextPart {
                                text: String::new(),
                            })]
                        }),
                });
            }
        }
    }

    let system_instruction = if system_parts.is_empty() {
        None
    } else {
        Some(Content {
            role: None,
            parts: system_parts,
        })
    };

    let tools = request.tools.as_ref().and_then(|tools| {
        if tools.is_empty() {
            return None;
        }
        Some(vec![GoogleTool {
            function_declarations: tools
                .iter()
                .map(|t| FunctionDeclaration {
                    name: t.function.name.clone(),
                    description: t.function.description.clone(),
                    parameters: t.function.parameters.clone(),
                })
                .collect(),
        }])
    });

    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: Some(GenerationConfig {
            max_output_tokens: Some(
                request
                    .max_completion_tokens
                    .or(request.max_tokens)
                    .unwrap_or(DEFAULT_MAX_TOKENS),
            ),
            temperature: request.temperature,
            top_p: request.top_p,
            stop_sequences: request.stop.as_ref().map(|s| s.to_vec()),
        }),
        tools,
    }
}

fn convert_user_parts(content: &ChatContent) -> Vec<Part> {
    match content {
        ChatContent::Text(s) => vec![Part::Text(TextPart { text: s.clone() })],
        ChatContent::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ChatContentPart::Text { text } => Part::Text(TextPart { text: text.clone() }),
                ChatContentPart::ImageUrl { image_url } => {
                    if let Some((mime_type, data)) = parse_data_url(&image_url.url) {
                        Part::InlineData(InlineDataPart {
                            inline_data: InlineData { mime_type, data },
                        })
                    } else {
                        Part::Text(TextPart {
                            text: IMAGE_PLACEHOLDER.to_string(),
                        })
                    }
                }
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::openai::{ChatMessage, ImageUrl};

    fn message(role: &str, text: &str) -> ChatMessage {
        ChatMessage {
            role: role.to_string(),
            content: Some(ChatContent::Text(text.to_string())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn request(messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "gemini-2.5-flash".to_string(),
            messages,
            max_tokens: Some(256),
            max_completion_tokens: None,
            temperature: Some(0.3),
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
    fn test_system_becomes_system_instruction() {
        let req = request(vec![message("system", "Be terse."), message("user", "hi")]);
        let out = chat_to_gemini(&req);
        let sys = out.system_instruction.unwrap();
        assert!(matches!(&sys.parts[0], Part::Text(t) if t.text == "Be terse."));
        assert_eq!(out.contents.len(), 1);
        assert_eq!(out.contents[0].role.as_deref(), Some("user"));
    }

    #[test]
    fn test_assistant_maps_to_model_role() {
        let req = request(vec![
            message("user", "hi"),
            message("assistant", "hello"),
            message("user", "again"),
        ]);
        let out = chat_to_gemini(&req);
        let roles: Vec<_> = out
            .contents
            .iter()
            .map(|c| c.role.as_deref().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
    }

    #[test]
    fn test_generation_config() {
        let req = request(vec![message("user", "hi")]);
        let out = chat_to_gemini(&req);
        let config = out.generation_config.unwrap();
        assert_eq!(config.max_output_tokens, Some(256));
        assert_eq!(config.temperature, Some(0.3));
    }

    #[test]
    fn test_data_url_becomes_inline_data() {
        let req = request(vec![ChatMessage {
            role: "user".to_string(),
            content: Some(ChatContent::Parts(vec![ChatContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "data:image/png;base64,iVBOR".to_string(),
                },
            }])),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }]);
        let out = chat_to_gemini(&req);
        match &out.contents[0].parts[0] {
            Part::InlineData(p) => {
                assert_eq!(p.inline_data.mime_type, "image/png");
                assert_eq!(p.inline_data.data, "iVBOR");
            }
            other => panic!("expected inlineData, got {other:?}"),
        }
    }

    #[test]
    fn test_unresolved_remote_image_gets_placeholder() {
        let req = request(vec![ChatMessage {
            role: "user".to_string(),
            content: Some(ChatContent::Parts(vec![ChatContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: "https://example.com/cat.png".to_string(),
                },
            }])),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }]);
        let out = chat_to_gemini(&req);
        match &out.contents[0].parts[0] {
            Part::Text(t) => assert_eq!(t.text, IMAGE_PLACEHOLDER),
            other => panic!("expected placeholder text, got {other:?}"),
        }
    }

    #[test]
    fn test_tools_become_function_declarations() {
        let mut req = request(vec![message("user", "weather?")]);
        req.tools = Some(vec![crate::format::openai::ToolDef {
            tool_type: "function".to_string(),
            function: crate::format::openai::FunctionDef {
                name: "get_weather".to_string(),
                description: None,
                parameters: Some(serde_json::json!({"type":"object"})),
            },
        }]);
        let out = chat_to_gemini(&req);
        let tools = out.tools.unwrap();
        assert_eq!(tools[0].function_declarations[0].name, "get_weather");
    }
}
