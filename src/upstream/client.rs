use base64::Engine;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::format::openai::{ChatContentPart, ChatMessage};
use crate::models::Provider;

type HttpsClient = Client<
    hyper_rustls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    Full<Bytes>,
>;

/// The `:method` suffix of the upstream URL for a provider/stream combination.
pub fn upstream_method(provider: Provider, streaming: bool) -> &'static str {
    match (provider, streaming) {
        (Provider::Anthropic, false) => "rawPredict",
        (Provider::Anthropic, true) => "streamRawPredict",
        (Provider::Google, false) => "generateContent",
        (Provider::Google, true) => "streamGenerateContent?alt=sse",
        (Provider::Imagen, _) => "predict",
    }
}

/// HTTP client for Vertex AI publisher endpoints.
pub struct VertexClient {
    client: HttpsClient,
}

impl VertexClient {
    pub fn new() -> Self {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_only()
            .enable_http1()
            .enable_http2()
            .build();

        Self {
            client: Client::builder(TokioExecutor::new()).build(connector),
        }
    }

    /// Build the publisher model URL for a region.
    ///
    /// Regional: `https://{region}-aiplatform.googleapis.com/v1/projects/{p}/locations/{region}/...`
    /// The `global` region uses the cross-region endpoint without a host prefix.
    pub fn url(region: &str, project: &str, publisher: &str, model: &str, method: &str) -> String {
        let host = if region == "global" {
            "aiplatform.googleapis.com".to_string()
        } else {
            format!("{region}-aiplatform.googleapis.com")
        };
        format!(
            "https://{host}/v1/projects/{project}/locations/{region}/publishers/{publisher}/models/{model}:{method}"
        )
    }

    /// POST a translated body; returns response headers plus the unread body.
    pub async fn post(
        &self,
        url: &str,
        access_token: &str,
        body: Bytes,
        streaming: bool,
    ) -> Result<hyper::Response<hyper::body::Incoming>> {
        let mut req = Request::builder()
            .method("POST")
            .uri(url)
            .header("Authorization", format!("Bearer {access_token}"))
            .header("Content-Type", "application/json");

        if streaming {
            req = req.header("Accept", "text/event-stream");
        }

        let req = req
            .body(Full::new(body))
            .map_err(|e| Error::Http(e.to_string()))?;

        self.client
            .request(req)
            .await
            .map_err(|e| Error::Http(e.to_string()))
    }

    /// Fetch a remote image and return it as a `data:` URI.
    pub async fn fetch_image_as_data_url(&self, url: &str) -> Result<String> {
        let req = Request::builder()
            .method("GET")
            .uri(url)
            .body(Full::new(Bytes::new()))
            .map_err(|e| Error::Http(e.to_string()))?;

        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Error::Http(format!(
                "image fetch returned {}",
                response.status()
            )));
        }

        let mime_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .split(';')
            .next()
            .unwrap_or("image/png")
            .to_string();

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::Http(e.to_string()))?
            .to_bytes();

        let encoded = base64::engine::general_purpose::STANDARD.encode(&body);
        Ok(format!("data:{mime_type};base64,{encoded}"))
    }

    /// Pre-pass for the Gemini path: inline every remote image URL as a
    /// `data:` URI so the translator stays pure. Fetch failures substitute
    /// the placeholder text part and log a warning; the request never fails.
    pub async fn inline_remote_images(&self, messages: &mut [ChatMessage], request_id: &str) {
        for msg in messages.iter_mut() {
            let Some(crate::format::openai::ChatContent::Parts(parts)) = &mut msg.content else {
                continue;
            };
            for part in parts.iter_mut() {
                let ChatContentPart::ImageUrl { image_url } = part else {
                    continue;
                };
                if image_url.url.starts_with("data:") {
                    continue;
                }
                match self.fetch_image_as_data_url(&image_url.url).await {
                    Ok(data_url) => {
                        debug!(request_id = %request_id, url = %image_url.url, "Inlined remote image");
                        image_url.url = data_url;
                    }
                    Err(e) => {
                        warn!(
                            request_id = %request_id,
                            url = %image_url.url,
                            error = %e,
                            "Image fetch failed, substituting placeholder"
                        );
                        *part = ChatContentPart::Text {
                            text: crate::format::to_google::IMAGE_PLACEHOLDER.to_string(),
                        };
                    }
                }
            }
        }
    }
}

impl Default for VertexClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regional_url() {
        let url = VertexClient::url(
            "us-east5",
            "my-project",
            "anthropic",
            "claude-sonnet-4-5@20250929",
            "streamRawPredict",
        );
        assert_eq!(
            url,
            "https://us-east5-aiplatform.googleapis.com/v1/projects/my-project/locations/us-east5/publishers/anthropic/models/claude-sonnet-4-5@20250929:streamRawPredict"
        );
    }

    #[test]
    fn test_global_url() {
        let url = VertexClient::url(
            "global",
            "my-project",
            "google",
            "gemini-2.5-flash",
            "generateContent",
        );
        assert_eq!(
            url,
            "https://aiplatform.googleapis.com/v1/projects/my-project/locations/global/publishers/google/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn test_method_selection() {
        assert_eq!(upstream_method(Provider::Anthropic, false), "rawPredict");
        assert_eq!(
            upstream_method(Provider::Anthropic, true),
            "streamRawPredict"
        );
        assert_eq!(upstream_method(Provider::Google, false), "generateContent");
        assert_eq!(
            upstream_method(Provider::Google, true),
            "streamGenerateContent?alt=sse"
        );
        assert_eq!(upstream_method(Provider::Imagen, false), "predict");
        assert_eq!(upstream_method(Provider::Imagen, true), "predict");
    }
}
