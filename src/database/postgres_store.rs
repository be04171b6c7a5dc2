//! Postgres confirmation store
//!
//! The terminal transition is an optimistic `UPDATE ... WHERE phase IN
//! ('pending', 'verifying')`; the entity update runs in the same transaction
//! and a rejected entity change rolls both back.

use super::confirmation_store::{check_binding, check_mutation_kind, ConfirmationStore, StoreError};
use crate::middleware::logging::log_database_query;
use crate::verification::types::{
    ConfirmationRecord, EntityKind, EntityStatus, EntityTransition, Phase, Resolution,
    ResolveOutcome, VerificationRequest,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::warn;

const RECORD_COLUMNS: &str =
    "reference, entity_kind, entity_id, phase, attempts, created_at, resolved_at";

#[derive(Debug, sqlx::FromRow)]
struct ConfirmationRow {
    reference: String,
    entity_kind: String,
    entity_id: String,
    phase: String,
    attempts: i32,
    created_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<ConfirmationRow> for ConfirmationRecord {
    type Error = StoreError;

    fn try_from(row: ConfirmationRow) -> Result<Self, Self::Error> {
        let corrupt = |reason: String| StoreError::Corrupt {
            reference: row.reference.clone(),
            reason,
        };
        let entity_kind = EntityKind::from_str(&row.entity_kind)
            .ok_or_else(|| corrupt(format!("unknown entity kind '{}'", row.entity_kind)))?;
        let phase = Phase::from_str(&row.phase)
            .ok_or_else(|| corrupt(format!("unknown phase '{}'", row.phase)))?;
        let attempts = u32::try_from(row.attempts)
            .map_err(|_| corrupt(format!("negative attempts {}", row.attempts)))?;

        Ok(ConfirmationRecord {
            reference: row.reference,
            entity_kind,
            entity_id: row.entity_id,
            phase,
            attempts,
            created_at: row.created_at,
            resolved_at: row.resolved_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgConfirmationStore {
    pool: PgPool,
}

impl PgConfirmationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn entity_status(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<EntityStatus>, StoreError> {
        let sql = format!("SELECT status FROM {} WHERE id = $1", kind.table());
        let status: Option<String> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match status {
            None => Ok(None),
            Some(s) => EntityStatus::from_str(&s).map(Some).ok_or_else(|| StoreError::Corrupt {
                reference: id.to_string(),
                reason: format!("unknown {} status '{}'", kind, s),
            }),
        }
    }

    /// Explain why an entity update matched no row
    async fn entity_rejection(&self, record: &ConfirmationRecord, mutation: &EntityTransition) -> StoreError {
        match self.entity_status(record.entity_kind, &record.entity_id).await {
            Ok(Some(current)) => StoreError::EntityTransitionRejected {
                kind: record.entity_kind,
                id: record.entity_id.clone(),
                current,
                target: mutation.to,
            },
            Ok(None) => StoreError::EntityNotFound {
                kind: record.entity_kind,
                id: record.entity_id.clone(),
            },
            Err(e) => e,
        }
    }
}

#[async_trait]
impl ConfirmationStore for PgConfirmationStore {
    async fn find(&self, reference: &str) -> Result<Option<ConfirmationRecord>, StoreError> {
        let sql = format!(
            "SELECT {} FROM confirmation_records WHERE reference = $1",
            RECORD_COLUMNS
        );
        let row = log_database_query(
            "SELECT confirmation_records",
            sqlx::query_as::<_, ConfirmationRow>(&sql)
                .bind(reference)
                .fetch_optional(&self.pool),
        )
        .await?;
        row.map(ConfirmationRecord::try_from).transpose()
    }

    async fn get_or_create(
        &self,
        request: &VerificationRequest,
        now: DateTime<Utc>,
    ) -> Result<ConfirmationRecord, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO confirmation_records (reference, entity_kind, entity_id, phase, attempts, created_at)
            VALUES ($1, $2, $3, 'pending', 0, $4)
            ON CONFLICT (reference) DO NOTHING
            "#,
        )
        .bind(&request.reference)
        .bind(request.entity_kind.as_str())
        .bind(&request.entity_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let record = self
            .find(&request.reference)
            .await?
            .ok_or_else(|| StoreError::RecordNotFound {
                reference: request.reference.clone(),
            })?;
        check_binding(&record, request)?;
        Ok(record)
    }

    async fn increment_attempt(&self, reference: &str) -> Result<ConfirmationRecord, StoreError> {
        let sql = format!(
            r#"
            UPDATE confirmation_records
            SET attempts = attempts + 1,
                phase = CASE WHEN phase = 'pending' THEN 'verifying' ELSE phase END
            WHERE reference = $1 AND phase IN ('pending', 'verifying')
            RETURNING {}
            "#,
            RECORD_COLUMNS
        );
        let row = sqlx::query_as::<_, ConfirmationRow>(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => ConfirmationRecord::try_from(row),
            // Terminal (or missing): report what is stored
            None => self
                .find(reference)
                .await?
                .ok_or_else(|| StoreError::RecordNotFound {
                    reference: reference.to_string(),
                }),
        }
    }

    async fn try_resolve(
        &self,
        reference: &str,
        resolution: Resolution,
        mutation: Option<EntityTransition>,
        now: DateTime<Utc>,
    ) -> Result<ResolveOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE confirmation_records
            SET phase = $2, resolved_at = $3
            WHERE reference = $1 AND phase IN ('pending', 'verifying')
            RETURNING {}
            "#,
            RECORD_COLUMNS
        );
        let row = log_database_query(
            "UPDATE confirmation_records (resolve)",
            sqlx::query_as::<_, ConfirmationRow>(&sql)
                .bind(reference)
                .bind(resolution.phase().as_str())
                .bind(now)
                .fetch_optional(&mut *tx),
        )
        .await?;

        let record = match row {
            Some(row) => ConfirmationRecord::try_from(row)?,
            None => {
                tx.rollback().await?;
                let current = self
                    .find(reference)
                    .await?
                    .ok_or_else(|| StoreError::RecordNotFound {
                        reference: reference.to_string(),
                    })?;
                return Ok(ResolveOutcome::AlreadyResolved(current.phase));
            }
        };

        if let Some(mutation) = &mutation {
            check_mutation_kind(&record, mutation)?;

            let allowed: Vec<String> = mutation.from.iter().map(|s| s.as_str().to_string()).collect();
            let sql = format!(
                "UPDATE {} SET status = $1, updated_at = $2 WHERE id = $3 AND status = ANY($4)",
                record.entity_kind.table()
            );
            let result = sqlx::query(&sql)
                .bind(mutation.to.as_str())
                .bind(now)
                .bind(&record.entity_id)
                .bind(&allowed)
                .execute(&mut *tx)
                .await?;

            if result.rows_affected() == 0 {
                tx.rollback().await?;
                let err = self.entity_rejection(&record, mutation).await;
                warn!(
                    reference = %reference,
                    entity_kind = %record.entity_kind,
                    entity_id = %record.entity_id,
                    error = %err,
                    "Entity update rejected, confirmation record left open"
                );
                return Err(err);
            }
        }

        tx.commit().await?;
        Ok(ResolveOutcome::Applied(resolution.phase()))
    }
}
