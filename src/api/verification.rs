//! Payment verification endpoints
//!
//! Gateway return pages land on `/api/payments/verify` (one step per call) or
//! `/api/payments/verify/stream` (server-driven polling over SSE). Provider
//! push notifications arrive on `/api/payments/webhook`.

use crate::error::AppError;
use crate::logging::{mask_reference, redact_sensitive_data};
use crate::middleware::logging::extract_client_ip;
use crate::payments::gateway::GatewayStatus;
use crate::payments::webhook::{parse_notification, verify_signature, SIGNATURE_HEADER};
use crate::verification::clock::Scheduler;
use crate::verification::polling::{BackoffPolicy, PollingController};
use crate::verification::resolver::{RedirectParams, TransactionReferenceResolver};
use crate::verification::state_machine::VerificationStateMachine;
use crate::verification::types::{EntityKind, Phase, VerificationRequest};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Verification status returned to the confirmation page
#[derive(Debug, Clone, Serialize)]
pub struct VerificationStatusResponse {
    pub reference: String,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub phase: Phase,
    pub message: String,
    pub terminal: bool,
    /// Seconds until the page should ask again; `None` once terminal
    pub retry_after_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecheckResponse {
    pub reference: String,
    pub phase: Phase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_status: Option<GatewayStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecheckParams {
    pub reference: Option<String>,
}

/// Service dependencies for the verification endpoints
#[derive(Clone)]
pub struct VerificationService {
    pub machine: Arc<VerificationStateMachine>,
    pub resolver: Arc<TransactionReferenceResolver>,
    pub scheduler: Arc<dyn Scheduler>,
    pub backoff: BackoffPolicy,
    pub webhook_secret: String,
    /// Flips to `true` on shutdown and stops open streams
    pub shutdown: watch::Receiver<bool>,
}

impl VerificationService {
    pub fn new(
        machine: Arc<VerificationStateMachine>,
        resolver: Arc<TransactionReferenceResolver>,
        scheduler: Arc<dyn Scheduler>,
        backoff: BackoffPolicy,
        webhook_secret: String,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            machine,
            resolver,
            scheduler,
            backoff,
            webhook_secret,
            shutdown,
        }
    }

    /// Resolve the redirect and advance verification by one step
    pub async fn verify(&self, params: &RedirectParams) -> Result<VerificationStatusResponse, AppError> {
        let request = self.resolve(params).await?;
        let phase = self
            .machine
            .step(&request)
            .await
            .map_err(|e| AppError::from(e).with_reference(request.reference.clone()))?;

        let attempts = match self.machine.store().find(&request.reference).await {
            Ok(Some(record)) => record.attempts,
            Ok(None) => 1,
            Err(e) => {
                warn!(error = %e, "Could not read attempts for retry hint");
                1
            }
        };
        Ok(self.status_response(&request, phase, attempts))
    }

    fn status_response(
        &self,
        request: &VerificationRequest,
        phase: Phase,
        attempts: u32,
    ) -> VerificationStatusResponse {
        let terminal = phase.is_terminal();
        VerificationStatusResponse {
            reference: request.reference.clone(),
            entity_kind: request.entity_kind,
            entity_id: request.entity_id.clone(),
            phase,
            message: phase.message(request.entity_kind),
            terminal,
            retry_after_secs: (!terminal).then(|| self.backoff.delay_for(attempts.max(1)).as_secs()),
        }
    }

    async fn resolve(&self, params: &RedirectParams) -> Result<VerificationRequest, AppError> {
        self.resolver.resolve(params).await.map_err(|e| {
            let err = AppError::from(e);
            match params.reference() {
                Some(reference) => err.with_reference(reference),
                None => err,
            }
        })
    }
}

/// GET /health
pub async fn health() -> &'static str {
    "OK"
}

/// GET /api/payments/verify
pub async fn verify_payment(
    State(service): State<Arc<VerificationService>>,
    Query(params): Query<RedirectParams>,
) -> Result<Json<VerificationStatusResponse>, AppError> {
    debug!(
        reference = %params.reference().map(mask_reference).unwrap_or_default(),
        "GET /api/payments/verify"
    );
    service.verify(&params).await.map(Json)
}

/// GET /api/payments/verify/stream
///
/// Runs a polling loop for this connection and emits one `phase` event per
/// step. The loop stops when the client disconnects.
pub async fn stream_verification(
    State(service): State<Arc<VerificationService>>,
    Query(params): Query<RedirectParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let request = service.resolve(&params).await?;

    let (tx, rx) = mpsc::channel(8);
    let controller = PollingController::new(
        service.machine.clone(),
        service.scheduler.clone(),
        service.backoff,
    );
    let cancel = service.shutdown.clone();
    let reference = mask_reference(&request.reference);

    tokio::spawn(async move {
        match controller.run(request, tx, cancel).await {
            Ok(outcome) => debug!(reference = %reference, ?outcome, "Verification stream ended"),
            Err(e) => warn!(reference = %reference, error = %e, "Verification stream aborted"),
        }
    });

    let events = stream::unfold(rx, |mut rx| async move {
        let update = rx.recv().await?;
        let event = Event::default()
            .event("phase")
            .json_data(&update)
            .unwrap_or_else(|_| Event::default().event("phase").data(update.phase.as_str()));
        Some((Ok::<_, Infallible>(event), rx))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// POST /api/payments/verify/recheck
pub async fn recheck_payment(
    State(service): State<Arc<VerificationService>>,
    Query(params): Query<RecheckParams>,
) -> Result<Json<RecheckResponse>, AppError> {
    let reference = service
        .resolver
        .validate_reference(params.reference.as_deref())
        .map_err(AppError::from)?;

    let report = service
        .machine
        .recheck(reference)
        .await
        .map_err(|e| AppError::from(e).with_reference(reference))?;

    Ok(Json(RecheckResponse {
        reference: reference.to_string(),
        phase: report.phase,
        gateway_status: report.gateway_status,
    }))
}

/// POST /api/payments/webhook
pub async fn payment_webhook(
    State(service): State<Arc<VerificationService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookAck>), AppError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    if let Err(e) = verify_signature(&service.webhook_secret, &body, signature) {
        warn!(
            client_ip = %extract_client_ip(&headers).unwrap_or_else(|| "-".to_string()),
            error = %e,
            "Rejected payment webhook"
        );
        return Err(e.into());
    }

    debug!(
        payload = %redact_sensitive_data(&String::from_utf8_lossy(&body)),
        "Payment webhook received"
    );

    let Some(notification) = parse_notification(&body)? else {
        return Ok((
            StatusCode::OK,
            Json(WebhookAck {
                status: "ignored",
                phase: None,
            }),
        ));
    };

    let outcome = service
        .machine
        .apply_notification(&notification)
        .await
        .map_err(|e| AppError::from(e).with_reference(notification.reference.clone()))?;

    match outcome {
        Some(phase) => {
            info!(
                reference = %mask_reference(&notification.reference),
                phase = %phase,
                "Payment webhook applied"
            );
            Ok((
                StatusCode::OK,
                Json(WebhookAck {
                    status: "processed",
                    phase: Some(phase),
                }),
            ))
        }
        None => Ok((
            StatusCode::ACCEPTED,
            Json(WebhookAck {
                status: "deferred",
                phase: None,
            }),
        )),
    }
}
