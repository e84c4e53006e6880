use axum::body::Body;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Rule source error: {0}")]
    RuleSourceError(String),

    #[error("Resource not found: {0}")]
    NotFoundError(String),

    #[error("Bad request: {0}")]
    BadRequestError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let (status, error_message, error_code) = match &self {
            EngineError::ConfigError(_) => (
                StatusCode::BAD_REQUEST,
                self.to_string(),
                "CONFIG_ERROR",
            ),
            EngineError::IoError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO operation failed".to_string(),
                "IO_ERROR",
            ),
            EngineError::YamlError(_) => (
                StatusCode::BAD_REQUEST,
                "YAML parsing failed".to_string(),
                "YAML_ERROR",
            ),
            EngineError::SerializationError(_) => (
                StatusCode::BAD_REQUEST,
                "Data serialization failed".to_string(),
                "SERIALIZATION_ERROR",
            ),
            EngineError::HttpError(_) => (
                StatusCode::BAD_GATEWAY,
                "HTTP request failed".to_string(),
                "HTTP_ERROR",
            ),
            EngineError::RuleSourceError(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                self.to_string(),
                "RULE_SOURCE_ERROR",
            ),
            EngineError::NotFoundError(_) => (
                StatusCode::NOT_FOUND,
                self.to_string(),
                "NOT_FOUND_ERROR",
            ),
            EngineError::BadRequestError(_) => (
                StatusCode::BAD_REQUEST,
                self.to_string(),
                "BAD_REQUEST_ERROR",
            ),
            EngineError::InternalError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                "INTERNAL_ERROR",
            ),
        };

        let body_str = serde_json::to_string(&json!({
            "error": {
                "code": error_code,
                "message": error_message,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }
        }))
        .unwrap_or_else(|_| "{\"error\":{\"code\":\"INTERNAL_ERROR\"}}".to_string());
        let mut resp = Response::new(Body::from(body_str));
        *resp.status_mut() = status;
        resp.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/json"),
        );
        resp
    }
}

// Helper functions for creating specific errors
impl EngineError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        EngineError::ConfigError(msg.into())
    }

    pub fn rule_source<S: Into<String>>(msg: S) -> Self {
        EngineError::RuleSourceError(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        EngineError::NotFoundError(msg.into())
    }

    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        EngineError::BadRequestError(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        EngineError::InternalError(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    #[test]
    fn test_not_found_maps_to_404() {
        let resp = EngineError::not_found("rule missing").into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_bad_request_maps_to_400() {
        let resp = EngineError::bad_request("not an object").into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
