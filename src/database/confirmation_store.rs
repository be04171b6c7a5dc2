//! Idempotent confirmation store
//!
//! One record per payment reference. `try_resolve` is the only way a record
//! reaches a terminal phase, and it applies the paired entity status change in
//! the same atomic unit. Implementations must treat it as a compare-and-set on
//! `phase`: once terminal, every later call is a no-op.

use crate::verification::types::{
    ConfirmationRecord, EntityKind, EntityStatus, EntityTransition, Resolution, ResolveOutcome,
    VerificationRequest,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("reference {reference} is already bound to {bound_kind} {bound_id}")]
    ReferenceConflict {
        reference: String,
        bound_kind: EntityKind,
        bound_id: String,
    },

    #[error("no confirmation record for reference {reference}")]
    RecordNotFound { reference: String },

    #[error("{kind} {id} not found")]
    EntityNotFound { kind: EntityKind, id: String },

    #[error("{kind} {id} cannot move from {current} to {target}")]
    EntityTransitionRejected {
        kind: EntityKind,
        id: String,
        current: EntityStatus,
        target: EntityStatus,
    },

    #[error("corrupt confirmation record {reference}: {reason}")]
    Corrupt { reference: String, reason: String },
}

#[cfg(feature = "database")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

#[async_trait]
pub trait ConfirmationStore: Send + Sync {
    /// Read-only lookup
    async fn find(&self, reference: &str) -> Result<Option<ConfirmationRecord>, StoreError>;

    /// Existing record for the reference, or a new one in `Pending`.
    ///
    /// Fails with [`StoreError::ReferenceConflict`] when the reference is
    /// already bound to a different entity.
    async fn get_or_create(
        &self,
        request: &VerificationRequest,
        now: DateTime<Utc>,
    ) -> Result<ConfirmationRecord, StoreError>;

    /// Count one verification attempt. The first attempt moves `Pending` to
    /// `Verifying`; terminal records are returned unchanged.
    async fn increment_attempt(&self, reference: &str) -> Result<ConfirmationRecord, StoreError>;

    /// Move a non-terminal record to `resolution` and apply `mutation` to its
    /// entity, atomically. Already-terminal records are left untouched and
    /// their phase is reported back.
    async fn try_resolve(
        &self,
        reference: &str,
        resolution: Resolution,
        mutation: Option<EntityTransition>,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome, StoreError>;
}

pub(crate) fn check_binding(
    record: &ConfirmationRecord,
    request: &VerificationRequest,
) -> Result<(), StoreError> {
    if record.binds(request.entity_kind, &request.entity_id) {
        Ok(())
    } else {
        Err(StoreError::ReferenceConflict {
            reference: record.reference.clone(),
            bound_kind: record.entity_kind,
            bound_id: record.entity_id.clone(),
        })
    }
}

pub(crate) fn check_mutation_kind(
    record: &ConfirmationRecord,
    mutation: &EntityTransition,
) -> Result<(), StoreError> {
    if mutation.kind == record.entity_kind {
        Ok(())
    } else {
        Err(StoreError::Corrupt {
            reference: record.reference.clone(),
            reason: format!(
                "{} mutation requested for a {} record",
                mutation.kind, record.entity_kind
            ),
        })
    }
}
