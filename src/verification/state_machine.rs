//! Verification state machine
//!
//! One transition function for bookings, investments and gifts. Each `step`
//! consults the store first and only asks the gateway while the record is
//! still open. Terminal transitions go through
//! [`ConfirmationStore::try_resolve`], the single linearization point for
//! concurrent polls, webhooks and rechecks.

use crate::database::ConfirmationStore;
use crate::log_phase_change;
use crate::logging::mask_reference;
use crate::payments::gateway::{GatewayStatus, PaymentStatusGateway};
use crate::payments::webhook::PaymentNotification;
use crate::verification::clock::Clock;
use crate::verification::error::VerificationError;
use crate::verification::types::{
    ConfirmationRecord, Phase, Resolution, ResolveOutcome, VerificationRequest,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Limits after which a verification gives up with `Expired`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationPolicy {
    pub max_attempts: u32,
    /// Measured from record creation
    pub deadline: Duration,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 12,
            deadline: Duration::from_secs(600),
        }
    }
}

/// Result of a manual "check again"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RecheckReport {
    pub phase: Phase,
    /// Provider answer when a read-only probe was made
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_status: Option<GatewayStatus>,
}

pub struct VerificationStateMachine {
    store: Arc<dyn ConfirmationStore>,
    gateway: Arc<dyn PaymentStatusGateway>,
    clock: Arc<dyn Clock>,
    policy: VerificationPolicy,
}

impl VerificationStateMachine {
    pub fn new(
        store: Arc<dyn ConfirmationStore>,
        gateway: Arc<dyn PaymentStatusGateway>,
        clock: Arc<dyn Clock>,
        policy: VerificationPolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<dyn ConfirmationStore> {
        &self.store
    }

    pub fn policy(&self) -> VerificationPolicy {
        self.policy
    }

    /// Advance verification of `request` by one attempt and report the phase
    #[instrument(
        skip(self, request),
        fields(
            reference = %mask_reference(&request.reference),
            entity_kind = %request.entity_kind,
            entity_id = %request.entity_id,
        )
    )]
    pub async fn step(&self, request: &VerificationRequest) -> Result<Phase, VerificationError> {
        let record = self.store.get_or_create(request, self.clock.now()).await?;
        if record.phase.is_terminal() {
            debug!(phase = %record.phase, "Already resolved, skipping gateway");
            return Ok(record.phase);
        }

        let record = self.store.increment_attempt(&request.reference).await?;
        if record.phase.is_terminal() {
            return Ok(record.phase);
        }

        if let Some(reason) = self.expiry_reason(&record) {
            let outcome = self
                .store
                .try_resolve(&record.reference, Resolution::Expired, None, self.clock.now())
                .await?;
            self.report(&record, outcome, reason);
            return Ok(outcome.phase());
        }

        match self.gateway.check_status(&request.reference).await {
            Ok(GatewayStatus::Succeeded) => self.resolve(&record, Resolution::Confirmed, "gateway").await,
            Ok(GatewayStatus::Failed) => self.resolve(&record, Resolution::Failed, "gateway").await,
            Ok(status) => {
                debug!(
                    gateway = self.gateway.name(),
                    gateway_status = %status,
                    attempts = record.attempts,
                    "Payment not yet definitive"
                );
                Ok(record.phase)
            }
            Err(e) => {
                warn!(
                    gateway = self.gateway.name(),
                    attempts = record.attempts,
                    error = %e,
                    "Transient gateway error, still verifying"
                );
                Ok(record.phase)
            }
        }
    }

    /// Resolve a record from a provider push notification.
    ///
    /// Returns `None` when the notification is not definitive, or names a
    /// reference with no record and no entity to bind it to. Never counts as
    /// an attempt.
    #[instrument(skip(self, notification), fields(reference = %mask_reference(&notification.reference)))]
    pub async fn apply_notification(
        &self,
        notification: &PaymentNotification,
    ) -> Result<Option<Phase>, VerificationError> {
        let resolution = match notification.status {
            GatewayStatus::Succeeded => Resolution::Confirmed,
            GatewayStatus::Failed => Resolution::Failed,
            GatewayStatus::Pending | GatewayStatus::NotFound => return Ok(None),
        };

        let record = match &notification.entity {
            Some((kind, id)) => {
                let request = VerificationRequest::new(notification.reference.clone(), *kind, id.clone());
                self.store.get_or_create(&request, self.clock.now()).await?
            }
            None => match self.store.find(&notification.reference).await? {
                Some(record) => record,
                None => {
                    info!("Notification for unknown reference without entity metadata, deferring");
                    return Ok(None);
                }
            },
        };

        if record.phase.is_terminal() {
            return Ok(Some(record.phase));
        }
        self.resolve(&record, resolution, "webhook").await.map(Some)
    }

    /// Manual "check again". Expired stays expired; the gateway is probed
    /// read-only so an operator can follow up on late payments.
    #[instrument(skip(self, reference), fields(reference = %mask_reference(reference)))]
    pub async fn recheck(&self, reference: &str) -> Result<RecheckReport, VerificationError> {
        let record = self.store.find(reference).await?.ok_or_else(|| {
            VerificationError::invalid_reference("no verification exists for this reference")
        })?;

        match record.phase {
            Phase::Expired => {
                let gateway_status = match self.gateway.check_status(reference).await {
                    Ok(status) => Some(status),
                    Err(e) => {
                        warn!(error = %e, "Recheck probe failed");
                        None
                    }
                };
                if gateway_status == Some(GatewayStatus::Succeeded) {
                    warn!(
                        event_type = "late_payment",
                        entity_kind = %record.entity_kind,
                        entity_id = %record.entity_id,
                        "Payment succeeded after verification expired, manual follow-up required"
                    );
                }
                Ok(RecheckReport {
                    phase: Phase::Expired,
                    gateway_status,
                })
            }
            Phase::Confirmed | Phase::Failed => Ok(RecheckReport {
                phase: record.phase,
                gateway_status: None,
            }),
            Phase::Pending | Phase::Verifying => Ok(RecheckReport {
                phase: self.step(&record.request()).await?,
                gateway_status: None,
            }),
        }
    }

    fn expiry_reason(&self, record: &ConfirmationRecord) -> Option<&'static str> {
        if record.attempts > self.policy.max_attempts {
            return Some("max_attempts");
        }
        let deadline = chrono::Duration::from_std(self.policy.deadline).unwrap_or(chrono::Duration::MAX);
        if self.clock.now().signed_duration_since(record.created_at) > deadline {
            return Some("deadline");
        }
        None
    }

    async fn resolve(
        &self,
        record: &ConfirmationRecord,
        resolution: Resolution,
        source: &'static str,
    ) -> Result<Phase, VerificationError> {
        let mutation = match resolution {
            Resolution::Confirmed => Some(record.entity_kind.activate()),
            Resolution::Failed => Some(record.entity_kind.revert()),
            Resolution::Expired => None,
        };
        let outcome = self
            .store
            .try_resolve(&record.reference, resolution, mutation, self.clock.now())
            .await?;
        self.report(record, outcome, source);
        Ok(outcome.phase())
    }

    fn report(&self, record: &ConfirmationRecord, outcome: ResolveOutcome, source: &str) {
        match outcome {
            ResolveOutcome::Applied(phase) => {
                log_phase_change!(
                    reference = mask_reference(&record.reference),
                    entity_kind = record.entity_kind,
                    entity_id = record.entity_id,
                    phase = phase,
                    attempts = record.attempts,
                    source = source,
                );
            }
            ResolveOutcome::AlreadyResolved(phase) => {
                debug!(phase = %phase, source = source, "Resolved concurrently, keeping stored phase");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::InMemoryConfirmationStore;
    use crate::payments::gateway::GatewayError;
    use crate::verification::clock::ManualClock;
    use crate::verification::types::{EntityKind, EntityStatus};
    use async_trait::async_trait;
    use chrono::Utc;

    /// Always gives the same answer
    struct FixedGateway(Option<GatewayStatus>);

    #[async_trait]
    impl PaymentStatusGateway for FixedGateway {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn check_status(&self, _reference: &str) -> Result<GatewayStatus, GatewayError> {
            self.0.ok_or(GatewayError::Timeout { secs: 10 })
        }
    }

    async fn machine(
        status: Option<GatewayStatus>,
        clock: ManualClock,
    ) -> (VerificationStateMachine, Arc<InMemoryConfirmationStore>) {
        let store = Arc::new(InMemoryConfirmationStore::new());
        store
            .insert_entity(EntityKind::Booking, "B-1", EntityStatus::Unpaid)
            .await;
        let machine = VerificationStateMachine::new(
            store.clone(),
            Arc::new(FixedGateway(status)),
            Arc::new(clock),
            VerificationPolicy {
                max_attempts: 5,
                deadline: Duration::from_secs(60),
            },
        );
        (machine, store)
    }

    fn request() -> VerificationRequest {
        VerificationRequest::new("TXN-1", EntityKind::Booking, "B-1")
    }

    #[tokio::test]
    async fn test_transient_errors_keep_verifying() {
        let (machine, store) = machine(None, ManualClock::new(Utc::now())).await;

        assert_eq!(machine.step(&request()).await.unwrap(), Phase::Verifying);
        assert_eq!(machine.step(&request()).await.unwrap(), Phase::Verifying);

        let record = store.find("TXN-1").await.unwrap().unwrap();
        assert_eq!(record.attempts, 2);
        let booking = store.entity(EntityKind::Booking, "B-1").await.unwrap();
        assert_eq!(booking.status, EntityStatus::Unpaid);
    }

    #[tokio::test]
    async fn test_deadline_expires_without_mutation() {
        let clock = ManualClock::new(Utc::now());
        let (machine, store) = machine(Some(GatewayStatus::Pending), clock.clone()).await;

        assert_eq!(machine.step(&request()).await.unwrap(), Phase::Verifying);
        clock.advance(Duration::from_secs(61));
        assert_eq!(machine.step(&request()).await.unwrap(), Phase::Expired);

        let booking = store.entity(EntityKind::Booking, "B-1").await.unwrap();
        assert_eq!(booking.revision, 0);
    }

    #[tokio::test]
    async fn test_recheck_keeps_expired_and_reports_gateway_status() {
        let clock = ManualClock::new(Utc::now());
        let (machine, store) = machine(Some(GatewayStatus::Succeeded), clock.clone()).await;
        store.get_or_create(&request(), clock.now()).await.unwrap();
        store
            .try_resolve("TXN-1", Resolution::Expired, None, clock.now())
            .await
            .unwrap();

        let report = machine.recheck("TXN-1").await.unwrap();
        assert_eq!(
            report,
            RecheckReport {
                phase: Phase::Expired,
                gateway_status: Some(GatewayStatus::Succeeded),
            }
        );
        let booking = store.entity(EntityKind::Booking, "B-1").await.unwrap();
        assert_eq!(booking.status, EntityStatus::Unpaid);
    }

    #[tokio::test]
    async fn test_recheck_unknown_reference() {
        let (machine, _) = machine(None, ManualClock::new(Utc::now())).await;
        let err = machine.recheck("TXN-404").await.unwrap_err();
        assert!(matches!(err, VerificationError::InvalidReference { .. }));
    }

    #[tokio::test]
    async fn test_notification_without_record_or_metadata_is_deferred() {
        let (machine, store) = machine(None, ManualClock::new(Utc::now())).await;
        let notification = PaymentNotification {
            reference: "TXN-77".to_string(),
            status: GatewayStatus::Succeeded,
            entity: None,
        };
        assert_eq!(machine.apply_notification(&notification).await.unwrap(), None);
        assert!(store.find("TXN-77").await.unwrap().is_none());
    }
}
