use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error("{0}")]
    Validation(String),
    #[error("gateway unavailable: {0}")]
    RemoteUnavailable(String),
    #[error("gateway rejected the request ({status}): {body}")]
    RemoteRejected { status: u16, body: String },
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
    #[error("invalid identifier in {field}: {value:?}")]
    InvalidIdentifier { field: &'static str, value: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("another request is still in progress")]
    Busy,
}

impl AppError {
    /// Short text for the toast shown to the user. Details stay in the logs.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(msg) => msg.clone(),
            AppError::RemoteUnavailable(_) => {
                "Could not reach the server. Please try again later.".into()
            }
            AppError::RemoteRejected { body, .. } if !body.trim().is_empty() => {
                format!("The server rejected the request: {}", body.trim())
            }
            AppError::RemoteRejected { status, .. } => {
                format!("The server rejected the request (status {status}).")
            }
            AppError::InvalidResponse(_) | AppError::InvalidIdentifier { .. } => {
                "The server sent an unexpected response.".into()
            }
            AppError::Unauthorized => "Invalid email or password.".into(),
            AppError::Busy => "Please wait for the current request to finish.".into(),
            AppError::NotFound => "Page not found.".into(),
            AppError::Config(_)
            | AppError::Io(_)
            | AppError::Serde(_)
            | AppError::Other(_) => "Something went wrong on our side.".into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Config(_) | AppError::Io(_) | AppError::Serde(_) | AppError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::RemoteUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::RemoteRejected { .. }
            | AppError::InvalidResponse(_)
            | AppError::InvalidIdentifier { .. } => StatusCode::BAD_GATEWAY,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Busy => StatusCode::CONFLICT,
        };

        (status, self.user_message()).into_response()
    }
}
