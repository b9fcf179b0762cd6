use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::worker::supervisor::ExitOutcome;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Forbidden: Invalid API Key")]
    Unauthorized,

    #[error("Failed to stage input {url}: {message}")]
    Staging { url: String, message: String },

    #[error("Failed to start {program}: {message}")]
    Launch { program: String, message: String },

    #[error("Process exited unsuccessfully ({outcome})")]
    Runtime { outcome: ExitOutcome },

    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    #[error("Upload to {url} failed: {message}")]
    Upload { url: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AgentError::Unauthorized => StatusCode::FORBIDDEN,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AgentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
