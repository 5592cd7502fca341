use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AppError::Timeout(err.to_string())
        } else {
            AppError::Transport(err.to_string())
        }
    }
}

impl AppError {
    /// Network-level failures: connection problems, timeouts, bad upstream status.
    pub fn is_transport(&self) -> bool {
        matches!(self, AppError::Transport(_) | AppError::Timeout(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Transport(_) => StatusCode::BAD_GATEWAY,
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Schema(_) => StatusCode::BAD_GATEWAY,
            AppError::MalformedInput(_) => StatusCode::BAD_REQUEST,
            AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::TomlParse(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config_error",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::Transport(_) => "transport_error",
            AppError::Timeout(_) => "timeout_error",
            AppError::Schema(_) => "schema_error",
            AppError::MalformedInput(_) => "malformed_input",
            AppError::Io(_) => "io_error",
            AppError::TomlParse(_) => "toml_parse_error",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        error!(error_code = code, message = %message, "Request failed");

        let body = Json(json!({
            "error": {
                "message": message,
                "code": code
            }
        }));

        (status, body).into_response()
    }
}
