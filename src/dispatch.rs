use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::Response;
use tracing::{debug, info, warn};

use crate::auth::CredentialBridge;
use crate::config::Config;
use crate::error::{ApiError, Error, Result};
use crate::format::anthropic::MessagesResponse;
use crate::format::google::GenerateContentResponse;
use crate::format::imagen::PredictResponse;
use crate::format::openai::{
    ChatCompletionRequest, ChatCompletionResponse, CompletionChoice, CompletionResponse,
    ImagesRequest,
};
use crate::format::response::{
    anthropic_to_chat, anthropic_to_completion, gemini_to_chat, imagen_to_images,
};
use crate::format::{chat_to_anthropic, chat_to_gemini, images_to_predict,
    prepare_messages_passthrough};
use crate::models::{Provider, Resolved, resolve};
use crate::regions::{self, DiscoveryCache};
use crate::server::json_response;
use crate::streaming::{
    ProxyBody, StreamShape, new_completion_id, passthrough_stream_response, streaming_response,
};
use crate::truncate::auto_truncate;
use crate::upstream::{VertexClient, run_failover, upstream_method};

/// Everything a dispatch needs; shared across requests, internally immutable.
pub struct ProxyState {
    pub config: Config,
    pub client: VertexClient,
    pub credentials: CredentialBridge,
    pub discovery: Option<DiscoveryCache>,
    alias_pairs: Vec<(String, String)>,
}

impl ProxyState {
    pub fn new(
        config: Config,
        client: VertexClient,
        credentials: CredentialBridge,
        discovery: Option<DiscoveryCache>,
    ) -> Self {
        let alias_pairs = config.alias_pairs();
        Self {
            config,
            client,
            credentials,
            discovery,
            alias_pairs,
        }
    }

    pub fn resolve_model(&self, input: &str) -> Resolved {
        let input = if input.is_empty() {
            &self.config.default_model
        } else {
            input
        };
        let resolved = resolve(input, &self.alias_pairs);
        if resolved.spec.is_none() {
            warn!(
                model = %input,
                canonical = %resolved.canonical,
                "Unknown model, proceeding on the Anthropic branch"
            );
        }
        resolved
    }

    /// Per-request wall clock, shared by the HTTP surface and the detached
    /// streaming tasks.
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.request_timeout_secs)
    }

    /// `enabled_models`, when set, restricts which catalog models are served.
    fn check_enabled(&self, resolved: &Resolved) -> Result<()> {
        if resolved.spec.is_some()
            && !self.config.enabled_models.is_empty()
            && !self
                .config
                .enabled_models
                .iter()
                .any(|m| m == &resolved.canonical)
        {
            return Err(Error::Api(ApiError::InvalidRequest {
                message: format!("model {} is not enabled", resolved.canonical),
            }));
        }
        Ok(())
    }
}

/// Chat completions (and lifted legacy completions) dispatch: resolve, trim,
/// translate, fail over, then hand the upstream response to the right
/// handler. One fallback-chain rewrite per inbound request.
pub async fn dispatch_chat(
    state: &ProxyState,
    request: ChatCompletionRequest,
    shape: StreamShape,
    request_id: &str,
) -> Result<Response<ProxyBody>> {
    let result = execute_chat(state, request.clone(), shape, request_id).await;

    let exhausted = matches!(result, Err(Error::Api(ApiError::RegionsExhausted { .. })));
    if exhausted {
        let resolved = state.resolve_model(&request.model);
        if let Some(fallback) = state.config.fallback_for(&resolved.canonical) {
            warn!(
                request_id = %request_id,
                primary = %resolved.canonical,
                fallback = %fallback,
                "All regions exhausted, rewriting to fallback model"
            );
            let mut fallback_request = request;
            fallback_request.model = fallback.to_string();
            return execute_chat(state, fallback_request, shape, request_id).await;
        }
    }

    result
}

async fn execute_chat(
    state: &ProxyState,
    mut request: ChatCompletionRequest,
    shape: StreamShape,
    request_id: &str,
) -> Result<Response<ProxyBody>> {
    let resolved = state.resolve_model(&request.model);

    if resolved.provider == Provider::Imagen {
        return Err(Error::Api(ApiError::InvalidRequest {
            message: format!(
                "model {} generates images; use /v1/images/generations",
                resolved.canonical
            ),
        }));
    }
    state.check_enabled(&resolved)?;

    debug!(
        request_id = %request_id,
        model_input = %request.model,
        resolved = %resolved.canonical,
        provider = %resolved.provider.as_str(),
        streaming = request.stream,
        "Dispatching chat request"
    );

    if state.config.auto_truncate
        && let Some(spec) = resolved.spec
    {
        auto_truncate(
            &mut request.messages,
            spec.context_window,
            state.config.reserve_output_tokens,
            request_id,
        );
    }

    if resolved.provider == Provider::Google {
        state
            .client
            .inline_remote_images(&mut request.messages, request_id)
            .await;
    }

    let body = match resolved.provider {
        Provider::Anthropic => serde_json::to_vec(&chat_to_anthropic(&request))?,
        Provider::Google => serde_json::to_vec(&chat_to_gemini(&request))?,
        Provider::Imagen => unreachable!("imagen rejected above"),
    };

    let plan = regions::plan(
        &resolved.canonical,
        resolved.spec,
        resolved.provider,
        state.discovery.as_ref(),
        &state.config,
    );
    if plan.is_empty() {
        return Err(Error::NoRegion(resolved.canonical.clone()));
    }

    let method = upstream_method(resolved.provider, request.stream);
    let success = run_failover(
        &state.client,
        &state.credentials,
        &plan,
        &state.config.project_id,
        resolved.provider.publisher(),
        &resolved.canonical,
        method,
        &Bytes::from(body),
        request.stream,
        request_id,
    )
    .await?;

    if request.stream {
        return Ok(streaming_response(
            success.response.into_body(),
            resolved.provider,
            shape,
            resolved.canonical.clone(),
            request_id.to_string(),
            state.request_timeout(),
        ));
    }

    let body_bytes = success
        .response
        .into_body()
        .collect()
        .await
        .map_err(|e| Error::Http(e.to_string()))?
        .to_bytes();

    let response_json = match (resolved.provider, shape) {
        (Provider::Anthropic, StreamShape::Chat) => {
            let upstream: MessagesResponse = serde_json::from_slice(&body_bytes)?;
            serde_json::to_string(&anthropic_to_chat(
                &upstream,
                &resolved.canonical,
                &new_completion_id(shape),
            ))?
        }
        (Provider::Anthropic, StreamShape::Completion) => {
            let upstream: MessagesResponse = serde_json::from_slice(&body_bytes)?;
            serde_json::to_string(&anthropic_to_completion(
                &upstream,
                &resolved.canonical,
                &new_completion_id(shape),
            ))?
        }
        (Provider::Google, StreamShape::Chat) => {
            let upstream: GenerateContentResponse = serde_json::from_slice(&body_bytes)?;
            serde_json::to_string(&gemini_to_chat(
                &upstream,
                &resolved.canonical,
                &new_completion_id(shape),
            ))?
        }
        (Provider::Google, StreamShape::Completion) => {
            let upstream: GenerateContentResponse = serde_json::from_slice(&body_bytes)?;
            let chat = gemini_to_chat(&upstream, &resolved.canonical, &new_completion_id(shape));
            serde_json::to_string(&chat_response_to_completion(chat))?
        }
        (Provider::Imagen, _) => unreachable!("imagen rejected above"),
    };

    info!(
        request_id = %request_id,
        model = %resolved.canonical,
        region = %success.region,
        "Chat request completed"
    );

    Ok(json_response(200, response_json))
}

/// Reshape a chat-style response into the legacy completions shape.
fn chat_response_to_completion(chat: ChatCompletionResponse) -> CompletionResponse {
    let choice = chat.choices.into_iter().next();
    let (text, finish_reason) = choice
        .map(|c| (c.message.content.unwrap_or_default(), c.finish_reason))
        .unwrap_or_default();
    CompletionResponse {
        id: chat.id.replacen("chatcmpl-", "cmpl-", 1),
        object: "text_completion",
        created: chat.created,
        model: chat.model,
        choices: vec![CompletionChoice {
            text,
            index: 0,
            logprobs: None,
            finish_reason,
        }],
        usage: chat.usage,
    }
}

/// Anthropic messages passthrough: forward with minimal rewriting.
pub async fn dispatch_messages(
    state: &ProxyState,
    mut body: serde_json::Value,
    request_id: &str,
) -> Result<Response<ProxyBody>> {
    let model_input = body
        .get("model")
        .and_then(|m| m.as_str())
        .ok_or_else(|| {
            Error::Api(ApiError::InvalidRequest {
                message: "model is required".to_string(),
            })
        })?
        .to_string();

    let resolved = state.resolve_model(&model_input);
    if resolved.provider != Provider::Anthropic {
        return Err(Error::Api(ApiError::InvalidRequest {
            message: format!(
                "model {} is not an Anthropic model; use /v1/chat/completions",
                resolved.canonical
            ),
        }));
    }
    state.check_enabled(&resolved)?;

    let streaming = body
        .get("stream")
        .and_then(|s| s.as_bool())
        .unwrap_or(false);

    prepare_messages_passthrough(&mut body, streaming);

    let plan = regions::plan(
        &resolved.canonical,
        resolved.spec,
        resolved.provider,
        state.discovery.as_ref(),
        &state.config,
    );
    if plan.is_empty() {
        return Err(Error::NoRegion(resolved.canonical.clone()));
    }

    let method = upstream_method(Provider::Anthropic, streaming);
    let success = run_failover(
        &state.client,
        &state.credentials,
        &plan,
        &state.config.project_id,
        resolved.provider.publisher(),
        &resolved.canonical,
        method,
        &Bytes::from(serde_json::to_vec(&body)?),
        streaming,
        request_id,
    )
    .await?;

    if streaming {
        return Ok(passthrough_stream_response(
            success.response.into_body(),
            request_id.to_string(),
            state.request_timeout(),
        ));
    }

    let body_bytes = success
        .response
        .into_body()
        .collect()
        .await
        .map_err(|e| Error::Http(e.to_string()))?
        .to_bytes();

    info!(
        request_id = %request_id,
        model = %resolved.canonical,
        region = %success.region,
        "Messages request completed"
    );

    Ok(json_response(
        200,
        String::from_utf8_lossy(&body_bytes).to_string(),
    ))
}

/// Imagen dispatch for /v1/images/generations.
pub async fn dispatch_images(
    state: &ProxyState,
    request: ImagesRequest,
    request_id: &str,
) -> Result<Response<ProxyBody>> {
    let prompt = request
        .prompt
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| {
            Error::Api(ApiError::InvalidRequest {
                message: "prompt is required".to_string(),
            })
        })?
        .to_string();

    let model_input = request.model.clone().unwrap_or_else(|| "imagen".to_string());
    let resolved = state.resolve_model(&model_input);
    if resolved.provider != Provider::Imagen {
        return Err(Error::Api(ApiError::InvalidRequest {
            message: format!(
                "model {} is not an image generation model",
                resolved.canonical
            ),
        }));
    }
    state.check_enabled(&resolved)?;

    let body = serde_json::to_vec(&images_to_predict(&request, &prompt))?;

    let plan = regions::plan(
        &resolved.canonical,
        resolved.spec,
        resolved.provider,
        state.discovery.as_ref(),
        &state.config,
    );
    if plan.is_empty() {
        return Err(Error::NoRegion(resolved.canonical.clone()));
    }

    let success = run_failover(
        &state.client,
        &state.credentials,
        &plan,
        &state.config.project_id,
        resolved.provider.publisher(),
        &resolved.canonical,
        upstream_method(Provider::Imagen, false),
        &Bytes::from(body),
        false,
        request_id,
    )
    .await?;

    let body_bytes = success
        .response
        .into_body()
        .collect()
        .await
        .map_err(|e| Error::Http(e.to_string()))?
        .to_bytes();

    let upstream: PredictResponse = serde_json::from_slice(&body_bytes)?;
    let response = imagen_to_images(&upstream, &prompt);

    info!(
        request_id = %request_id,
        model = %resolved.canonical,
        region = %success.region,
        images = response.data.len(),
        "Image request completed"
    );

    Ok(json_response(200, serde_json::to_string(&response)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::openai::{ChatUsage, Choice, ResponseMessage};

    fn state() -> ProxyState {
        let mut config = Config::default();
        config.project_id = "test-project".to_string();
        ProxyState::new(
            config,
            VertexClient::new(),
            CredentialBridge::fixed("t"),
            None,
        )
    }

    #[test]
    fn test_resolve_model_through_state() {
        let state = state();
        let resolved = state.resolve_model("sonnet");
        assert_eq!(resolved.canonical, "claude-sonnet-4-5@20250929");
    }

    #[test]
    fn test_empty_model_uses_default() {
        let state = state();
        let resolved = state.resolve_model("");
        assert_eq!(resolved.canonical, state.config.default_model);
    }

    #[test]
    fn test_enabled_models_gate() {
        let mut config = Config::default();
        config.project_id = "p".to_string();
        config.enabled_models = vec!["gemini-2.5-flash".to_string()];
        let state = ProxyState::new(
            config,
            VertexClient::new(),
            CredentialBridge::fixed("t"),
            None,
        );

        let allowed = state.resolve_model("flash");
        assert!(state.check_enabled(&allowed).is_ok());

        let blocked = state.resolve_model("sonnet");
        assert!(state.check_enabled(&blocked).is_err());

        // Uncataloged models are not subject to the gate.
        let unknown = state.resolve_model("mystery-model");
        assert!(state.check_enabled(&unknown).is_ok());
    }

    #[test]
    fn test_chat_response_to_completion_shape() {
        let chat = ChatCompletionResponse {
            id: "chatcmpl-ff00".to_string(),
            object: "chat.completion",
            created: 1,
            model: "gemini-2.5-flash".to_string(),
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role: "assistant",
                    content: Some("out".to_string()),
                    tool_calls: None,
                },
                finish_reason: Some("stop".to_string()),
                logprobs: None,
            }],
            usage: Some(ChatUsage {
                prompt_tokens: 1,
                completion_tokens: 2,
                total_tokens: 3,
            }),
        };
        let completion = chat_response_to_completion(chat);
        assert_eq!(completion.id, "cmpl-ff00");
        assert_eq!(completion.choices[0].text, "out");
        assert_eq!(completion.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(completion.usage.unwrap().total_tokens, 3);
    }

    #[tokio::test]
    async fn test_images_requires_prompt() {
        let state = state();
        let request = ImagesRequest {
            model: None,
            prompt: None,
            n: None,
            size: None,
        };
        match dispatch_images(&state, request, "req_t").await {
            Err(Error::Api(ApiError::InvalidRequest { message })) => {
                assert!(message.contains("prompt"));
            }
            _ => panic!("expected invalid request"),
        }
    }

    #[tokio::test]
    async fn test_images_rejects_chat_model() {
        let state = state();
        let request = ImagesRequest {
            model: Some("sonnet".to_string()),
            prompt: Some("a fox".to_string()),
            n: None,
            size: None,
        };
        match dispatch_images(&state, request, "req_t").await {
            Err(Error::Api(ApiError::InvalidRequest { message })) => {
                assert!(message.contains("not an image generation model"));
            }
            _ => panic!("expected invalid request"),
        }
    }

    #[tokio::test]
    async fn test_messages_requires_model() {
        let state = state();
        let body = serde_json::json!({"messages": []});
        match dispatch_messages(&state, body, "req_t").await {
            Err(Error::Api(ApiError::InvalidRequest { message })) => {
                assert!(message.contains("model"));
            }
            _ => panic!("expected invalid request"),
        }
    }

    #[tokio::test]
    async fn test_messages_rejects_google_model() {
        let state = state();
        let body = serde_json::json!({"model": "flash", "messages": []});
        match dispatch_messages(&state, body, "req_t").await {
            Err(Error::Api(ApiError::InvalidRequest { message })) => {
                assert!(message.contains("not an Anthropic model"));
            }
            _ => panic!("expected invalid request"),
        }
    }
}
