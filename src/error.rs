use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Unified error type for the gateway
#[derive(Error, Debug)]
pub enum GatewayError {
    // Outbound dispatch errors
    #[error("No proxy endpoint available")]
    NoProxyAvailable,

    #[error("Retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Upstream returned {status}: {body}")]
    UpstreamError { status: u16, body: String },

    // Body handling errors
    #[error("Malformed upstream body at line {line}: {reason}")]
    MalformedUpstreamBody { line: usize, reason: String },

    // Endpoint source errors
    #[error("Endpoint source failure: {0}")]
    EndpointSource(String),

    // Authentication errors
    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Missing authorization header")]
    MissingAuthHeader,

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // Request errors
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            GatewayError::InvalidRequest(_) | GatewayError::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }

            // 401 Unauthorized
            GatewayError::InvalidApiKey | GatewayError::MissingAuthHeader => {
                StatusCode::UNAUTHORIZED
            }

            // 404 Not Found
            GatewayError::ImageNotFound(_) => StatusCode::NOT_FOUND,

            // Pass through whatever the upstream said
            GatewayError::UpstreamError { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }

            // 502 Bad Gateway
            GatewayError::RetriesExhausted { .. }
            | GatewayError::TransportFailure(_)
            | GatewayError::MalformedUpstreamBody { .. } => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            GatewayError::NoProxyAvailable | GatewayError::EndpointSource(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            // 500 Internal Server Error
            GatewayError::Io(_) | GatewayError::Json(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// OpenAI-style error type string for the response body
    fn error_type(&self) -> &'static str {
        match self {
            GatewayError::InvalidApiKey
            | GatewayError::MissingAuthHeader
            | GatewayError::InvalidRequest(_) => "invalid_request_error",
            GatewayError::UpstreamError { .. } => "upstream_error",
            _ => "gateway_error",
        }
    }

    /// Check if this is a client error (4xx)
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx)
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }
}

// OpenAI clients expect errors wrapped in an "error" object.
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
            }
        });

        (status, Json(body)).into_response()
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for GatewayError {
    fn from(err: url::ParseError) -> Self {
        GatewayError::InvalidConfig(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_code_mapping() {
        assert_eq!(
            GatewayError::InvalidRequest("bad".to_string()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayError::InvalidApiKey.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            GatewayError::NoProxyAvailable.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            GatewayError::RetriesExhausted {
                attempts: 3,
                last: "connect refused".to_string()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            GatewayError::MalformedUpstreamBody {
                line: 2,
                reason: "expected value".to_string()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_upstream_error_passes_status_through() {
        let err = GatewayError::UpstreamError {
            status: 418,
            body: "teapot".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::IM_A_TEAPOT);

        // Unmappable status degrades to 502
        let err = GatewayError::UpstreamError {
            status: 9999,
            body: String::new(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_error_client_server_helpers() {
        assert!(GatewayError::InvalidApiKey.is_client_error());
        assert!(!GatewayError::InvalidApiKey.is_server_error());

        assert!(GatewayError::NoProxyAvailable.is_server_error());
        assert!(!GatewayError::NoProxyAvailable.is_client_error());
    }
}
