use http_body_util::{BodyExt, Empty};
use hyper::Request;
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AuthError, Error, Result};

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

#[derive(Debug, Deserialize)]
struct MetadataToken {
    access_token: String,
}

enum Source {
    Ambient(Client<HttpConnector, Empty<Bytes>>),
    /// Fixed token, for tests and for callers that already hold one.
    Fixed(String),
}

/// Bridge to the ambient credential provider.
///
/// Resolution order: `GOOGLE_ACCESS_TOKEN` env var, GCE metadata server,
/// `gcloud auth print-access-token`. Tokens are fetched per upstream call
/// and never cached here; any caching lives inside the provider.
pub struct CredentialBridge {
    source: Source,
}

impl CredentialBridge {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            source: Source::Ambient(client),
        }
    }

    pub fn fixed(token: &str) -> Self {
        Self {
            source: Source::Fixed(token.to_string()),
        }
    }

    /// Fetch a short-lived bearer token.
    pub async fn token(&self) -> Result<String> {
        let client = match &self.source {
            Source::Fixed(token) => return Ok(token.clone()),
            Source::Ambient(client) => client,
        };

        if let Ok(token) = std::env::var("GOOGLE_ACCESS_TOKEN")
            && !token.is_empty()
        {
            return Ok(token);
        }

        match self.metadata_token(client).await {
            Ok(token) => return Ok(token),
            Err(e) => {
                debug!(error = %e, "Metadata server unavailable, trying gcloud");
            }
        }

        self.gcloud_token().await
    }

    async fn metadata_token(&self, client: &Client<HttpConnector, Empty<Bytes>>) -> Result<String> {
        let req = Request::builder()
            .method("GET")
            .uri(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .body(Empty::new())
            .map_err(|e| Error::Http(e.to_string()))?;

        let response = tokio::time::timeout(std::time::Duration::from_secs(2), client.request(req))
            .await
            .map_err(|_| Error::Auth(AuthError::ProviderFailed("metadata timeout".to_string())))?
            .map_err(|e| Error::Auth(AuthError::ProviderFailed(e.to_string())))?;

        if !response.status().is_success() {
            return Err(Error::Auth(AuthError::ProviderFailed(format!(
                "metadata server returned {}",
                response.status()
            ))));
        }

        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| Error::Auth(AuthError::ProviderFailed(e.to_string())))?
            .to_bytes();
        let token: MetadataToken = serde_json::from_slice(&body)
            .map_err(|e| Error::Auth(AuthError::ProviderFailed(e.to_string())))?;
        Ok(token.access_token)
    }

    async fn gcloud_token(&self) -> Result<String> {
        let output = tokio::process::Command::new("gcloud")
            .args(["auth", "print-access-token"])
            .output()
            .await
            .map_err(|e| {
                // Distinguish "gcloud not installed" from a rejected token.
                Error::Auth(AuthError::ProviderFailed(format!(
                    "gcloud invocation failed: {e}"
                )))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Auth(AuthError::ProviderFailed(
                stderr.trim().to_string(),
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(Error::Auth(AuthError::NoCredential));
        }
        Ok(token)
    }
}

impl Default for CredentialBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fixed_token() {
        let bridge = CredentialBridge::fixed("test-token-123");
        let token = bridge.token().await.unwrap();
        assert_eq!(token, "test-token-123");
    }

    #[tokio::test]
    async fn test_fixed_token_never_consults_environment() {
        let bridge = CredentialBridge::fixed("abc");
        // Two calls, same value, no caching semantics to observe.
        assert_eq!(bridge.token().await.unwrap(), "abc");
        assert_eq!(bridge.token().await.unwrap(), "abc");
    }
}
