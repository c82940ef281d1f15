// Error types for the mesh console

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

use crate::api::ApiResponse;
use crate::auth::AuthError;
use crate::machines::NameError;
use crate::routes::{ReconcileError, ReconcilePhase};
use crate::store::StoreError;

/// Main error type for console handlers
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Auth(#[from] AuthError),

    #[error("Machine {0} belongs to another account")]
    Forbidden(u64),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid machine name: {0}")]
    InvalidName(#[from] NameError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Route update failed: {0}")]
    Reconcile(#[from] ReconcileError),
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl AppError {
    /// Message shown to the console user
    pub fn user_message(&self) -> String {
        match self {
            AppError::Auth(_) => "user identity check failed".to_string(),
            AppError::Forbidden(_) => "permission denied for this device".to_string(),
            AppError::BadRequest(msg) => format!("malformed request: {}", msg),
            AppError::InvalidName(e) => format!("failed to rename device: {}", e),
            AppError::Store(e) => store_message(e),
            AppError::Reconcile(e) => match e.phase {
                ReconcilePhase::LoadRoutes => "failed to load device routes".to_string(),
                ReconcilePhase::ExitNode => "failed to set exit node state".to_string(),
                ReconcilePhase::SubnetReset | ReconcilePhase::SubnetEnable => {
                    "failed to set subnet route state".to_string()
                }
            },
        }
    }

    /// Upstream failures that a client may simply re-issue.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Store(StoreError::Backend(_))
                | AppError::Reconcile(ReconcileError {
                    source: StoreError::Backend(_),
                    ..
                })
        )
    }
}

fn store_message(e: &StoreError) -> String {
    match e {
        StoreError::MachineNotFound(_) => "device not found".to_string(),
        StoreError::RouteNotFound(_) => "route not found".to_string(),
        StoreError::UserNotFound(_) => "user not found".to_string(),
        StoreError::DuplicateExitRoute(_)
        | StoreError::RouteNotAdvertised(_)
        | StoreError::Backend(_) => "storage operation failed".to_string(),
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::warn!(retryable = self.is_retryable(), "Console request failed: {}", self);
        // Failures travel inside the envelope, the HTTP status stays 200.
        (
            StatusCode::OK,
            Json(ApiResponse::<()>::error(&self.user_message())),
        )
            .into_response()
    }
}
