//! HTTP-facing errors
//!
//! Every failure leaves the service as
//! `{"error": {"code", "message", "reference"?, "retry_after"?}}`.

use crate::database::StoreError;
use crate::payments::webhook::WebhookError;
use crate::verification::error::VerificationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidReference,
    ReferenceConflict,
    InvalidSignature,
    MalformedPayload,
    StoreUnavailable,
    InternalError,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidReference | ErrorCode::MalformedPayload => StatusCode::BAD_REQUEST,
            ErrorCode::ReferenceConflict => StatusCode::CONFLICT,
            ErrorCode::InvalidSignature => StatusCode::UNAUTHORIZED,
            ErrorCode::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

#[derive(Debug)]
pub struct AppError {
    code: ErrorCode,
    message: String,
    reference: Option<String>,
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            reference: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn error_code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.code == ErrorCode::StoreUnavailable
    }
}

impl From<VerificationError> for AppError {
    fn from(e: VerificationError) -> Self {
        match e {
            VerificationError::InvalidReference { reason } => {
                AppError::new(ErrorCode::InvalidReference, reason)
            }
            VerificationError::ReferenceConflict { ref reference, .. } => {
                let reference = reference.clone();
                AppError::new(ErrorCode::ReferenceConflict, e.to_string()).with_reference(reference)
            }
            VerificationError::Store(StoreError::Database(message)) => {
                error!(error = %message, "Confirmation store unavailable");
                AppError::new(
                    ErrorCode::StoreUnavailable,
                    "Payment verification is temporarily unavailable. Please try again shortly.",
                )
            }
            VerificationError::Store(other) => {
                error!(error = %other, "Confirmation store rejected the operation");
                AppError::new(
                    ErrorCode::InternalError,
                    "We could not complete verification. Please contact support with your payment reference.",
                )
            }
        }
    }
}

impl From<WebhookError> for AppError {
    fn from(e: WebhookError) -> Self {
        match e {
            WebhookError::MissingSignature | WebhookError::InvalidSignature => {
                AppError::new(ErrorCode::InvalidSignature, e.to_string())
            }
            WebhookError::MalformedPayload(_) => AppError::new(ErrorCode::MalformedPayload, e.to_string()),
            WebhookError::SecretNotConfigured => {
                error!("Webhook received but no gateway secret is configured");
                AppError::new(ErrorCode::InternalError, "Webhook handling is not configured")
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let retry_after = self.is_retryable().then_some(5);
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                reference: self.reference,
                retry_after,
            },
        };
        (self.code.status_code(), Json(body)).into_response()
    }
}
