//! In-memory confirmation store
//!
//! Records and domain entities share one lock, which makes every operation,
//! and `try_resolve` in particular, a single atomic unit. Used by tests and
//! when no database is configured. Without a database there is no other
//! source of entities, so [`InMemoryConfirmationStore::standalone`] registers
//! each entity as unpaid the first time a record binds to it.

use super::confirmation_store::{check_binding, check_mutation_kind, ConfirmationStore, StoreError};
use crate::verification::types::{
    ConfirmationRecord, DomainEntity, EntityKind, EntityStatus, EntityTransition, Phase,
    Resolution, ResolveOutcome, VerificationRequest,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Tables {
    records: HashMap<String, ConfirmationRecord>, // reference -> record
    entities: HashMap<(EntityKind, String), DomainEntity>,
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryConfirmationStore {
    tables: Arc<Mutex<Tables>>,
    register_entities: bool,
}

impl InMemoryConfirmationStore {
    /// Store that only mutates entities registered with [`Self::insert_entity`]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that owns its entities: binding a record to an unknown entity
    /// registers that entity as `Unpaid`
    pub fn standalone() -> Self {
        Self {
            register_entities: true,
            ..Self::default()
        }
    }

    /// Register a domain entity the store may mutate
    pub async fn insert_entity(&self, kind: EntityKind, id: &str, status: EntityStatus) {
        let mut tables = self.tables.lock().await;
        tables.entities.insert(
            (kind, id.to_string()),
            DomainEntity {
                kind,
                id: id.to_string(),
                status,
                revision: 0,
                updated_at: Utc::now(),
            },
        );
    }

    pub async fn entity(&self, kind: EntityKind, id: &str) -> Option<DomainEntity> {
        let tables = self.tables.lock().await;
        tables.entities.get(&(kind, id.to_string())).cloned()
    }
}

#[async_trait]
impl ConfirmationStore for InMemoryConfirmationStore {
    async fn find(&self, reference: &str) -> Result<Option<ConfirmationRecord>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.records.get(reference).cloned())
    }

    async fn get_or_create(
        &self,
        request: &VerificationRequest,
        now: DateTime<Utc>,
    ) -> Result<ConfirmationRecord, StoreError> {
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;
        let record = tables
            .records
            .entry(request.reference.clone())
            .or_insert_with(|| ConfirmationRecord::new(request, now));
        check_binding(record, request)?;

        if self.register_entities {
            let kind = request.entity_kind;
            tables
                .entities
                .entry((kind, request.entity_id.clone()))
                .or_insert_with(|| DomainEntity {
                    kind,
                    id: request.entity_id.clone(),
                    status: EntityStatus::Unpaid,
                    revision: 0,
                    updated_at: now,
                });
        }
        Ok(record.clone())
    }

    async fn increment_attempt(&self, reference: &str) -> Result<ConfirmationRecord, StoreError> {
        let mut tables = self.tables.lock().await;
        let record = tables
            .records
            .get_mut(reference)
            .ok_or_else(|| StoreError::RecordNotFound {
                reference: reference.to_string(),
            })?;

        if !record.phase.is_terminal() {
            record.attempts += 1;
            if record.phase == Phase::Pending {
                record.phase = Phase::Verifying;
            }
        }
        Ok(record.clone())
    }

    async fn try_resolve(
        &self,
        reference: &str,
        resolution: Resolution,
        mutation: Option<EntityTransition>,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome, StoreError> {
        let mut guard = self.tables.lock().await;
        let tables = &mut *guard;

        let record = tables
            .records
            .get_mut(reference)
            .ok_or_else(|| StoreError::RecordNotFound {
                reference: reference.to_string(),
            })?;

        if record.phase.is_terminal() {
            return Ok(ResolveOutcome::AlreadyResolved(record.phase));
        }

        // Validate everything before the first write so a rejection leaves
        // both tables untouched.
        if let Some(mutation) = &mutation {
            check_mutation_kind(record, mutation)?;
            let key = (record.entity_kind, record.entity_id.clone());
            let entity = tables
                .entities
                .get_mut(&key)
                .ok_or_else(|| StoreError::EntityNotFound {
                    kind: record.entity_kind,
                    id: record.entity_id.clone(),
                })?;
            if !mutation.applies_to(entity.status) {
                return Err(StoreError::EntityTransitionRejected {
                    kind: entity.kind,
                    id: entity.id.clone(),
                    current: entity.status,
                    target: mutation.to,
                });
            }
            entity.status = mutation.to;
            entity.revision += 1;
            entity.updated_at = now;
        }

        record.phase = resolution.phase();
        record.resolved_at = Some(now);
        Ok(ResolveOutcome::Applied(record.phase))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (InMemoryConfirmationStore, VerificationRequest) {
        let store = InMemoryConfirmationStore::new();
        store
            .insert_entity(EntityKind::Booking, "B-1", EntityStatus::Unpaid)
            .await;
        (store, VerificationRequest::new("TXN-1", EntityKind::Booking, "B-1"))
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let (store, request) = seeded().await;
        let created = store.get_or_create(&request, Utc::now()).await.unwrap();
        let again = store.get_or_create(&request, Utc::now()).await.unwrap();

        assert_eq!(created.phase, Phase::Pending);
        assert_eq!(created.created_at, again.created_at);
    }

    #[tokio::test]
    async fn test_get_or_create_detects_conflict() {
        let (store, request) = seeded().await;
        store.get_or_create(&request, Utc::now()).await.unwrap();

        let other = VerificationRequest::new("TXN-1", EntityKind::Gift, "G-7");
        let err = store.get_or_create(&other, Utc::now()).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::ReferenceConflict { bound_kind: EntityKind::Booking, .. }
        ));
    }

    #[tokio::test]
    async fn test_increment_attempt_flips_pending_once() {
        let (store, request) = seeded().await;
        store.get_or_create(&request, Utc::now()).await.unwrap();

        let first = store.increment_attempt("TXN-1").await.unwrap();
        assert_eq!((first.phase, first.attempts), (Phase::Verifying, 1));

        let second = store.increment_attempt("TXN-1").await.unwrap();
        assert_eq!((second.phase, second.attempts), (Phase::Verifying, 2));

        assert!(matches!(
            store.increment_attempt("missing").await,
            Err(StoreError::RecordNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_try_resolve_applies_exactly_once() {
        let (store, request) = seeded().await;
        store.get_or_create(&request, Utc::now()).await.unwrap();

        let first = store
            .try_resolve(
                "TXN-1",
                Resolution::Confirmed,
                Some(EntityKind::Booking.activate()),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(first, ResolveOutcome::Applied(Phase::Confirmed));

        let second = store
            .try_resolve(
                "TXN-1",
                Resolution::Failed,
                Some(EntityKind::Booking.revert()),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(second, ResolveOutcome::AlreadyResolved(Phase::Confirmed));

        let booking = store.entity(EntityKind::Booking, "B-1").await.unwrap();
        assert_eq!(booking.status, EntityStatus::Active);
        assert_eq!(booking.revision, 1);

        // Terminal records ignore further attempts
        let record = store.increment_attempt("TXN-1").await.unwrap();
        assert_eq!(record.attempts, 0);
        assert!(record.resolved_at.is_some());
    }

    #[tokio::test]
    async fn test_rejected_mutation_leaves_record_open() {
        let (store, _) = seeded().await;
        store
            .insert_entity(EntityKind::Booking, "B-2", EntityStatus::Cancelled)
            .await;
        let request = VerificationRequest::new("TXN-2", EntityKind::Booking, "B-2");
        store.get_or_create(&request, Utc::now()).await.unwrap();

        let err = store
            .try_resolve(
                "TXN-2",
                Resolution::Confirmed,
                Some(EntityKind::Booking.activate()),
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EntityTransitionRejected { .. }));

        let record = store.find("TXN-2").await.unwrap().unwrap();
        assert_eq!(record.phase, Phase::Pending);
        assert!(record.resolved_at.is_none());
        let booking = store.entity(EntityKind::Booking, "B-2").await.unwrap();
        assert_eq!((booking.status, booking.revision), (EntityStatus::Cancelled, 0));
    }

    #[tokio::test]
    async fn test_missing_entity_is_reported() {
        let store = InMemoryConfirmationStore::new();
        let request = VerificationRequest::new("TXN-5", EntityKind::Gift, "G-404");
        store.get_or_create(&request, Utc::now()).await.unwrap();

        let err = store
            .try_resolve(
                "TXN-5",
                Resolution::Confirmed,
                Some(EntityKind::Gift.activate()),
                Utc::now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::EntityNotFound { kind: EntityKind::Gift, .. }));
    }

    #[tokio::test]
    async fn test_standalone_store_registers_entity_on_first_binding() {
        let store = InMemoryConfirmationStore::standalone();
        let request = VerificationRequest::new("TXN-8", EntityKind::Booking, "B-8");
        store.get_or_create(&request, Utc::now()).await.unwrap();

        let booking = store.entity(EntityKind::Booking, "B-8").await.unwrap();
        assert_eq!((booking.status, booking.revision), (EntityStatus::Unpaid, 0));

        let outcome = store
            .try_resolve(
                "TXN-8",
                Resolution::Confirmed,
                Some(EntityKind::Booking.activate()),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(outcome, ResolveOutcome::Applied(Phase::Confirmed));

        // A later binding never resets an existing entity
        let again = VerificationRequest::new("TXN-9", EntityKind::Booking, "B-8");
        store.get_or_create(&again, Utc::now()).await.unwrap();
        let booking = store.entity(EntityKind::Booking, "B-8").await.unwrap();
        assert_eq!((booking.status, booking.revision), (EntityStatus::Active, 1));
    }

    #[tokio::test]
    async fn test_conflicting_binding_registers_nothing() {
        let store = InMemoryConfirmationStore::standalone();
        store
            .get_or_create(&VerificationRequest::new("TXN-10", EntityKind::Gift, "G-1"), Utc::now())
            .await
            .unwrap();

        let other = VerificationRequest::new("TXN-10", EntityKind::Investment, "I-1");
        assert!(store.get_or_create(&other, Utc::now()).await.is_err());
        assert!(store.entity(EntityKind::Investment, "I-1").await.is_none());
    }

    #[tokio::test]
    async fn test_expiry_resolves_without_entity() {
        let store = InMemoryConfirmationStore::new();
        let request = VerificationRequest::new("TXN-6", EntityKind::Investment, "I-1");
        store.get_or_create(&request, Utc::now()).await.unwrap();

        let outcome = store
            .try_resolve("TXN-6", Resolution::Expired, None, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome, ResolveOutcome::Applied(Phase::Expired));
    }
}
