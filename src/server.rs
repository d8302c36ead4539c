use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::dispatch::{ProxyState, dispatch_chat, dispatch_images, dispatch_messages};
use crate::error::{ApiError, Error};
use crate::format::completion_to_chat;
use crate::format::openai::{
    ChatCompletionRequest, CompletionRequest, ImagesRequest, ModelEntry, ModelPricing,
    ModelsResponse, VendorExtension,
};
use crate::logging::request_log;
use crate::models::{BUILTIN_ALIASES, CATALOG, ModelSpec, Provider, catalog_get};
use crate::regions::PRIORITY_REGIONS;
use crate::stats::get_stats;
use crate::streaming::{ProxyBody, StreamShape};

/// Maximum request body size (10 MiB).
const MAX_REQUEST_SIZE: usize = 10 * 1024 * 1024;

/// Listing timestamp for catalog entries (models predate the process).
const CATALOG_CREATED: i64 = 1_735_689_600;

/// Handle an incoming TCP connection: HTTP/1.1 with keep-alive, one service
/// per connection.
pub async fn handle_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    state: Arc<ProxyState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req| {
        let state = state.clone();
        async move { handle_request(req, state, remote_addr).await }
    });

    http1::Builder::new()
        .keep_alive(true)
        .serve_connection(io, service)
        .await?;

    Ok(())
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ProxyState>,
    remote_addr: SocketAddr,
) -> Result<Response<ProxyBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let request_id = generate_request_id();
    let start = std::time::Instant::now();

    debug!(
        method = %method,
        path = %path,
        remote = %remote_addr,
        request_id = %request_id,
        "Received request"
    );
    request_log().append(&request_id, &format!("{method} {path}"));

    let timeout = state.request_timeout();
    let result = match tokio::time::timeout(timeout, route(req, &state, &request_id)).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(timeout)),
    };

    let duration = start.elapsed();
    let response = match result {
        Ok(response) => {
            let status = response.status().as_u16();
            if status >= 400 {
                warn!(
                    method = %method,
                    path = %path,
                    status = status,
                    duration_ms = duration.as_millis(),
                    request_id = %request_id,
                    "Request failed"
                );
            } else {
                info!(
                    method = %method,
                    path = %path,
                    status = status,
                    duration_ms = duration.as_millis(),
                    request_id = %request_id,
                    "Request completed"
                );
            }
            request_log().append(&request_id, &format!("completed status={status}"));
            response
        }
        Err(e) => {
            let status = e.http_status();
            warn!(
                method = %method,
                path = %path,
                status = status,
                duration_ms = duration.as_millis(),
                request_id = %request_id,
                error = %e,
                "Request error"
            );
            request_log().append(&request_id, &format!("error status={status} {e}"));
            error_response(&e)
        }
    };

    Ok(response)
}

async fn route(
    req: Request<hyper::body::Incoming>,
    state: &Arc<ProxyState>,
    request_id: &str,
) -> Result<Response<ProxyBody>, Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (method, path.as_str()) {
        (Method::GET, "/") => handle_status(state),

        (Method::GET, "/health") => Ok(json_response(
            200,
            serde_json::json!({
                "status": "ok",
                "uptime": get_stats().uptime().as_secs(),
                "requestCount": get_stats().request_count(),
            })
            .to_string(),
        )),

        (Method::GET, "/stats") => Ok(json_response(200, get_stats().summary().to_string())),

        (Method::GET, "/v1/models") => handle_models(state),

        (Method::POST, "/v1/chat/completions") => {
            get_stats().record_request("/v1/chat/completions");
            let body = read_body_limited(req).await?;
            let request: ChatCompletionRequest = parse_json(&body)?;
            validate_chat(&request)?;
            dispatch_chat(state, request, StreamShape::Chat, request_id).await
        }

        (Method::POST, "/v1/completions") => {
            get_stats().record_request("/v1/completions");
            let body = read_body_limited(req).await?;
            let request: CompletionRequest = parse_json(&body)?;
            let chat = completion_to_chat(&request);
            dispatch_chat(state, chat, StreamShape::Completion, request_id).await
        }

        (Method::POST, "/v1/messages") | (Method::POST, "/messages") => {
            get_stats().record_request("/v1/messages");
            let body = read_body_limited(req).await?;
            let value: serde_json::Value = parse_json(&body)?;
            dispatch_messages(state, value, request_id).await
        }

        (Method::POST, "/v1/images/generations") => {
            get_stats().record_request("/v1/images/generations");
            let body = read_body_limited(req).await?;
            let request: ImagesRequest = parse_json(&body)?;
            dispatch_images(state, request, request_id).await
        }

        _ => Ok(json_response(
            404,
            serde_json::json!({
                "error": {"message": "Not found", "type": "invalid_request_error", "code": 404}
            })
            .to_string(),
        )),
    }
}

fn handle_status(state: &Arc<ProxyState>) -> Result<Response<ProxyBody>, Error> {
    let body = serde_json::json!({
        "name": "vproxy",
        "version": env!("CARGO_PKG_VERSION"),
        "project": state.config.project_id,
        "uptime_seconds": get_stats().uptime().as_secs(),
        "request_count": get_stats().request_count(),
        "regions": {
            "anthropic_default": state.config.default_region,
            "google_default": state.config.google_region,
            "priority": PRIORITY_REGIONS,
        },
        "endpoints": [
            "GET /",
            "GET /health",
            "GET /stats",
            "GET /v1/models",
            "POST /v1/chat/completions",
            "POST /v1/completions",
            "POST /v1/messages",
            "POST /v1/images/generations",
        ],
    });
    Ok(json_response(200, body.to_string()))
}

fn model_enabled(state: &ProxyState, id: &str) -> bool {
    state.config.enabled_models.is_empty() || state.config.enabled_models.iter().any(|m| m == id)
}

fn capabilities(provider: Provider) -> Vec<&'static str> {
    match provider {
        Provider::Anthropic => vec!["chat", "completions", "tools", "vision", "streaming"],
        Provider::Google => vec!["chat", "tools", "vision", "streaming"],
        Provider::Imagen => vec!["images"],
    }
}

fn vendor_extension(spec: &ModelSpec) -> VendorExtension {
    VendorExtension {
        provider: spec.provider.as_str(),
        display_name: spec.display_name,
        context_window: spec.context_window,
        max_output_tokens: spec.max_output_tokens,
        pricing: ModelPricing {
            input_per_mtok: spec.price_input,
            output_per_mtok: spec.price_output,
        },
        regions: spec.regions.iter().map(|r| r.to_string()).collect(),
        capabilities: capabilities(spec.provider),
    }
}

fn owned_by(provider: Provider) -> String {
    match provider {
        Provider::Anthropic => "anthropic".to_string(),
        Provider::Google | Provider::Imagen => "google".to_string(),
    }
}

/// Catalog entries plus every alias (config and compiled-in), each alias
/// carrying `root` set to its resolved canonical id.
fn handle_models(state: &Arc<ProxyState>) -> Result<Response<ProxyBody>, Error> {
    let mut data: Vec<ModelEntry> = Vec::new();

    for spec in CATALOG {
        if !model_enabled(state, spec.id) {
            continue;
        }
        data.push(ModelEntry {
            id: spec.id.to_string(),
            object: "model",
            created: CATALOG_CREATED,
            owned_by: owned_by(spec.provider),
            root: None,
            x_vertex: vendor_extension(spec),
        });
    }

    let mut push_alias = |alias: &str, target: &str| {
        let Some(spec) = catalog_get(target) else {
            return;
        };
        if !model_enabled(state, spec.id) {
            return;
        }
        if data.iter().any(|e| e.id == alias) {
            return;
        }
        data.push(ModelEntry {
            id: alias.to_string(),
            object: "model",
            created: CATALOG_CREATED,
            owned_by: owned_by(spec.provider),
            root: Some(spec.id.to_string()),
            x_vertex: vendor_extension(spec),
        });
    };

    for (alias, target) in &state.config.model_aliases {
        push_alias(alias, target);
    }
    for (alias, target) in BUILTIN_ALIASES {
        push_alias(alias, target);
    }

    let response = ModelsResponse {
        object: "list",
        data,
    };
    Ok(json_response(200, serde_json::to_string(&response)?))
}

fn validate_chat(request: &ChatCompletionRequest) -> Result<(), Error> {
    if request.n.unwrap_or(1) > 1 {
        return Err(Error::Api(ApiError::InvalidRequest {
            message: "n > 1 is not supported".to_string(),
        }));
    }
    if request.messages.is_empty() {
        return Err(Error::Api(ApiError::InvalidRequest {
            message: "messages array cannot be empty".to_string(),
        }));
    }
    if let Some(temp) = request.temperature
        && !(0.0..=2.0).contains(&temp)
    {
        return Err(Error::Api(ApiError::InvalidRequest {
            message: "temperature must be between 0.0 and 2.0".to_string(),
        }));
    }
    Ok(())
}

fn parse_json<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, Error> {
    serde_json::from_slice(body).map_err(|e| {
        Error::Api(ApiError::InvalidRequest {
            message: format!("Invalid JSON: {e}"),
        })
    })
}

async fn read_body_limited(req: Request<hyper::body::Incoming>) -> Result<Vec<u8>, Error> {
    if let Some(len) = req.headers().get("content-length")
        && let Ok(len) = len.to_str().unwrap_or("").parse::<usize>()
        && len > MAX_REQUEST_SIZE
    {
        return Err(Error::Api(ApiError::RequestTooLarge {
            size: len,
            max: MAX_REQUEST_SIZE,
        }));
    }

    let bytes = req
        .into_body()
        .collect()
        .await
        .map_err(|e| Error::Http(e.to_string()))?
        .to_bytes();

    if bytes.len() > MAX_REQUEST_SIZE {
        return Err(Error::Api(ApiError::RequestTooLarge {
            size: bytes.len(),
            max: MAX_REQUEST_SIZE,
        }));
    }

    Ok(bytes.to_vec())
}

pub fn generate_request_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("req_{:016x}", nanos as u64)
}

pub fn json_response(status: u16, body: String) -> Response<ProxyBody> {
    Response::builder()
        .status(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(body)).boxed())
        .expect("static header set")
}

/// Convert an error into its wire shape. Only reachable before headers are
/// sent; streaming faults never come through here.
pub fn error_response(error: &Error) -> Response<ProxyBody> {
    let status = error.http_status();
    let body = serde_json::json!({
        "error": {
            "message": error.client_message(),
            "type": error.error_type(),
            "code": status,
        }
    });
    json_response(status, body.to_string())
}
