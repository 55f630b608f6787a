//! Error taxonomy shared by the store, the services and the HTTP layer.

use axum::{
    extract::{rejection::JsonRejection, Request},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Errors raised by a [`crate::auth::repo::UserStore`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{field} is already registered")]
    Duplicate { field: &'static str },

    #[error("user {0} not found")]
    NotFound(uuid::Uuid),

    #[error("user store unavailable: {0}")]
    Unavailable(String),

    #[error("stored record is corrupt: {0}")]
    Corrupt(String),

    #[error("user store error: {0}")]
    Backend(String),
}

/// Errors returned to HTTP callers.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed input, or a uniqueness violation.
    #[error("{0}")]
    Validation(String),

    /// Bad credentials, wrong role, inactive account or rejected token.
    #[error("{0}")]
    Authentication(String),

    #[error("user store unavailable: {0}")]
    Connectivity(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn invalid_credentials() -> Self {
        AppError::Authentication("Invalid credentials".into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Authentication(_) => StatusCode::UNAUTHORIZED,
            AppError::Connectivity(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate { .. } => AppError::Validation(e.to_string()),
            StoreError::NotFound(_) => AppError::Authentication("User not found".into()),
            StoreError::Unavailable(msg) => AppError::Connectivity(msg),
            StoreError::Corrupt(_) | StoreError::Backend(_) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

/// Failure envelope: `{ success: false, message, detail? }`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Full error body including diagnostics, carried in response extensions
/// so that [`expose_error_detail`] can re-render it in development mode.
#[derive(Debug, Clone)]
pub struct DiagnosticBody(pub ErrorBody);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (message, detail) = match self {
            AppError::Validation(msg) | AppError::Authentication(msg) => (msg, None),
            AppError::Connectivity(msg) => {
                warn!(error = %msg, "user store unavailable");
                ("Service temporarily unavailable".to_string(), Some(msg))
            }
            AppError::Internal(msg) => {
                error!(error = %msg, "internal error");
                ("Internal server error".to_string(), Some(msg))
            }
        };

        let public = ErrorBody {
            success: false,
            message: message.clone(),
            detail: None,
        };
        let mut response = (status, Json(public)).into_response();
        if let Some(detail) = detail {
            response.extensions_mut().insert(DiagnosticBody(ErrorBody {
                success: false,
                message,
                detail: Some(detail),
            }));
        }
        response
    }
}

/// Middleware installed in development mode only: swaps the public error
/// body for the one carrying diagnostic detail.
pub async fn expose_error_detail(req: Request, next: Next) -> Response {
    let response = next.run(req).await;
    match response.extensions().get::<DiagnosticBody>().cloned() {
        Some(DiagnosticBody(body)) => (response.status(), Json(body)).into_response(),
        None => response,
    }
}

/// Fatal errors while bringing the service up. The binary exits on these
/// rather than serve without persistence.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("invalid configuration: {0}")]
    Config(#[source] anyhow::Error),

    #[error("cannot reach user store: {0}")]
    StoreUnreachable(#[source] sqlx::Error),
}
