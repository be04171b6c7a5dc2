//! HTTP API

pub mod verification;

use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use verification::{
    health, payment_webhook, recheck_payment, stream_verification, verify_payment,
    VerificationService,
};

pub fn router(service: Arc<VerificationService>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/payments/verify", get(verify_payment))
        .route("/api/payments/verify/stream", get(stream_verification))
        .route("/api/payments/verify/recheck", post(recheck_payment))
        .route("/api/payments/webhook", post(payment_webhook))
        .with_state(service)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
