use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// The caller has no dialog for the requested conversation.
    #[error("conversation not found")]
    NotFound,

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

pub type ChatResult<T> = std::result::Result<T, ChatError>;

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = match &self {
            ChatError::NotFound => StatusCode::NOT_FOUND,
            ChatError::Store(e) => {
                tracing::error!(error = %e, "store failure while serving request");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ChatError::Transport(_) => StatusCode::BAD_GATEWAY,
        };

        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
