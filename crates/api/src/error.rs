//! API error types with HTTP response mapping.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use inventory::LedgerError;
use saga::SagaError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request from the client.
    BadRequest(String),
    Saga(SagaError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Saga(err) => saga_status(err),
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "validation",
            ApiError::Saga(err) => err.reason_code(),
        }
    }
}

fn saga_status(err: &SagaError) -> StatusCode {
    if err.is_transient() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    match err {
        SagaError::Validation(_) | SagaError::InvalidSignature { .. } => StatusCode::BAD_REQUEST,
        SagaError::Forbidden { .. } => StatusCode::FORBIDDEN,
        SagaError::NotFound(_) | SagaError::UnknownPayment { .. } => StatusCode::NOT_FOUND,
        SagaError::Conflict { .. }
        | SagaError::InvalidTransition { .. }
        | SagaError::ReservationLapsed { .. }
        | SagaError::AlreadyExists(_) => StatusCode::CONFLICT,
        SagaError::OutOfStock { .. } | SagaError::PaymentRejected { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let reason = self.reason();
        let message = match &self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Saga(err) => err.to_string(),
        };
        if status.is_server_error() {
            tracing::error!(error = %message, reason, "request failed");
        }

        let body = serde_json::json!({ "error": message, "reason": reason });
        (status, axum::Json(body)).into_response()
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        ApiError::Saga(err)
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError::Saga(SagaError::from(err))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}
