use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("api error: {0}")]
    Api(#[from] ApiError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(String),

    #[error("no region available for model {0}")]
    NoRegion(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// HTTP status to surface to the inbound client when headers have not
    /// been sent yet.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Api(e) => e.http_status(),
            Error::Timeout(_) => 504,
            _ => 500,
        }
    }

    /// OpenAI-style `error.type` discriminator.
    pub fn error_type(&self) -> &'static str {
        match self {
            Error::Api(e) => e.error_type(),
            Error::Json(_) => "invalid_request_error",
            _ => "proxy_error",
        }
    }

    /// Message surfaced in `error.message`. Upstream failures expose the
    /// upstream body verbatim; everything else uses the Display form.
    pub fn client_message(&self) -> String {
        match self {
            Error::Api(ApiError::Upstream { body, .. })
            | Error::Api(ApiError::RegionsExhausted { body, .. }) => body.clone(),
            other => other.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no ambient credential available")]
    NoCredential,

    #[error("credential provider failed: {0}")]
    ProviderFailed(String),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("upstream error ({status}): {body}")]
    Upstream { status: u16, body: String },

    #[error("all regions exhausted, last error ({status}): {body}")]
    RegionsExhausted { status: u16, body: String },

    #[error("request body too large: {size} bytes (max: {max} bytes)")]
    RequestTooLarge { size: usize, max: usize },
}

impl ApiError {
    pub fn http_status(&self) -> u16 {
        match self {
            ApiError::InvalidRequest { .. } => 400,
            ApiError::Upstream { status, .. } => *status,
            ApiError::RegionsExhausted { status, .. } => *status,
            ApiError::RequestTooLarge { .. } => 413,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::InvalidRequest { .. } | ApiError::RequestTooLarge { .. } => {
                "invalid_request_error"
            }
            ApiError::Upstream { .. } | ApiError::RegionsExhausted { .. } => "upstream_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_maps_to_proxy_error() {
        let err = Error::Auth(AuthError::NoCredential);
        assert_eq!(err.http_status(), 500);
        assert_eq!(err.error_type(), "proxy_error");
    }

    #[test]
    fn test_upstream_status_passthrough() {
        let err = Error::Api(ApiError::Upstream {
            status: 404,
            body: "model not found".to_string(),
        });
        assert_eq!(err.http_status(), 404);
        assert_eq!(err.error_type(), "upstream_error");
    }

    #[test]
    fn test_exhausted_carries_last_status() {
        let err = Error::Api(ApiError::RegionsExhausted {
            status: 503,
            body: "overloaded".to_string(),
        });
        assert_eq!(err.http_status(), 503);
        assert!(err.to_string().contains("overloaded"));
    }

    #[test]
    fn test_client_message_is_upstream_body_verbatim() {
        let err = Error::Api(ApiError::Upstream {
            status: 400,
            body: "bad request".to_string(),
        });
        assert_eq!(err.client_message(), "bad request");

        let err = Error::Api(ApiError::InvalidRequest {
            message: "missing prompt".to_string(),
        });
        assert!(err.client_message().contains("missing prompt"));
    }

    #[test]
    fn test_invalid_request_is_400() {
        let err = Error::Api(ApiError::InvalidRequest {
            message: "missing prompt".to_string(),
        });
        assert_eq!(err.http_status(), 400);
        assert_eq!(err.error_type(), "invalid_request_error");
    }

    #[test]
    fn test_timeout_is_504() {
        let err = Error::Timeout(Duration::from_secs(300));
        assert_eq!(err.http_status(), 504);
    }
}
