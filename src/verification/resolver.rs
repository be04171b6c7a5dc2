//! Transaction reference resolution
//!
//! Turns raw redirect parameters into a [`VerificationRequest`]. When the
//! redirect carries no entity id or kind they are recovered from the
//! confirmation record already bound to the reference, and hints that
//! disagree with that record are a conflict. Read-only.

use crate::database::ConfirmationStore;
use crate::verification::error::VerificationError;
use crate::verification::types::{ConfirmationRecord, EntityKind, VerificationRequest};
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// Query parameters on the gateway return URL
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RedirectParams {
    pub reference: Option<String>,
    /// Paystack appends the reference a second time as `trxref`
    pub trxref: Option<String>,
    pub id: Option<String>,
    pub kind: Option<String>,
}

impl RedirectParams {
    pub fn reference(&self) -> Option<&str> {
        non_empty(self.reference.as_deref()).or_else(|| non_empty(self.trxref.as_deref()))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

pub struct TransactionReferenceResolver {
    pattern: Regex,
    store: Arc<dyn ConfirmationStore>,
}

impl TransactionReferenceResolver {
    pub fn new(pattern: &str, store: Arc<dyn ConfirmationStore>) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            store,
        })
    }

    /// Check a reference against the provider format
    pub fn validate_reference<'a>(&self, reference: Option<&'a str>) -> Result<&'a str, VerificationError> {
        let reference = non_empty(reference)
            .ok_or_else(|| VerificationError::invalid_reference("reference is missing"))?;
        if !self.pattern.is_match(reference) {
            return Err(VerificationError::invalid_reference(
                "reference does not match the provider format",
            ));
        }
        Ok(reference)
    }

    pub async fn resolve(&self, params: &RedirectParams) -> Result<VerificationRequest, VerificationError> {
        let reference = self.validate_reference(params.reference())?;

        let kind = match non_empty(params.kind.as_deref()) {
            Some(hint) => Some(EntityKind::from_hint(hint).ok_or_else(|| {
                VerificationError::invalid_reference(format!("unknown entity kind '{}'", hint))
            })?),
            None => None,
        };
        let id = non_empty(params.id.as_deref());

        let existing = self.store.find(reference).await?;

        // A reference already bound elsewhere is rejected here, before any
        // polling starts
        if let (Some(kind), Some(id)) = (kind, id) {
            if let Some(record) = existing {
                check_hints(record, Some(kind), Some(id))?;
            }
            return Ok(VerificationRequest::new(reference, kind, id));
        }

        let record = existing.ok_or_else(|| {
            VerificationError::invalid_reference("no entity is associated with this reference")
        })?;
        let record = check_hints(record, kind, id)?;

        debug!(
            reference = %crate::logging::mask_reference(reference),
            entity_kind = %record.entity_kind,
            entity_id = %record.entity_id,
            "Recovered entity from existing confirmation record"
        );
        Ok(record.request())
    }
}

fn check_hints(
    record: ConfirmationRecord,
    kind: Option<EntityKind>,
    id: Option<&str>,
) -> Result<ConfirmationRecord, VerificationError> {
    let kind_matches = kind.map_or(true, |k| k == record.entity_kind);
    let id_matches = id.map_or(true, |i| i == record.entity_id);
    if kind_matches && id_matches {
        Ok(record)
    } else {
        Err(VerificationError::ReferenceConflict {
            reference: record.reference,
            bound_kind: record.entity_kind,
            bound_id: record.entity_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_REFERENCE_PATTERN;
    use crate::database::InMemoryConfirmationStore;
    use chrono::Utc;

    fn params(reference: Option<&str>, id: Option<&str>, kind: Option<&str>) -> RedirectParams {
        RedirectParams {
            reference: reference.map(String::from),
            trxref: None,
            id: id.map(String::from),
            kind: kind.map(String::from),
        }
    }

    fn resolver(store: Arc<InMemoryConfirmationStore>) -> TransactionReferenceResolver {
        TransactionReferenceResolver::new(DEFAULT_REFERENCE_PATTERN, store).unwrap()
    }

    #[tokio::test]
    async fn test_rejects_missing_and_malformed_references() {
        let resolver = resolver(Arc::new(InMemoryConfirmationStore::new()));

        for reference in [None, Some(""), Some("   "), Some("x"), Some("TXN 1; DROP")] {
            let err = resolver
                .resolve(&params(reference, Some("B-1"), Some("booking")))
                .await
                .unwrap_err();
            assert!(matches!(err, VerificationError::InvalidReference { .. }), "{:?}", reference);
        }
    }

    #[tokio::test]
    async fn test_full_hints_resolve_new_reference() {
        let resolver = resolver(Arc::new(InMemoryConfirmationStore::new()));
        let request = resolver
            .resolve(&params(Some("TXN-1"), Some("B-1"), Some("short-let")))
            .await
            .unwrap();
        assert_eq!(request, VerificationRequest::new("TXN-1", EntityKind::Booking, "B-1"));
    }

    #[tokio::test]
    async fn test_trxref_alias() {
        let resolver = resolver(Arc::new(InMemoryConfirmationStore::new()));
        let redirect = RedirectParams {
            trxref: Some("TXN-9".to_string()),
            id: Some("G-1".to_string()),
            kind: Some("gift-code".to_string()),
            ..Default::default()
        };
        let request = resolver.resolve(&redirect).await.unwrap();
        assert_eq!(request.reference, "TXN-9");
        assert_eq!(request.entity_kind, EntityKind::Gift);
    }

    #[tokio::test]
    async fn test_recovers_entity_from_record() {
        let store = Arc::new(InMemoryConfirmationStore::new());
        store
            .get_or_create(&VerificationRequest::new("TXN-3", EntityKind::Investment, "I-3"), Utc::now())
            .await
            .unwrap();
        let resolver = resolver(store);

        let request = resolver.resolve(&params(Some("TXN-3"), None, None)).await.unwrap();
        assert_eq!(request.entity_id, "I-3");

        let err = resolver
            .resolve(&params(Some("TXN-3"), None, Some("booking")))
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::ReferenceConflict { .. }));
    }

    #[tokio::test]
    async fn test_full_hints_conflicting_with_record_are_rejected() {
        let store = Arc::new(InMemoryConfirmationStore::new());
        store
            .get_or_create(&VerificationRequest::new("TXN-4", EntityKind::Booking, "B-1"), Utc::now())
            .await
            .unwrap();
        let resolver = resolver(store);

        let err = resolver
            .resolve(&params(Some("TXN-4"), Some("I-9"), Some("investment")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            VerificationError::ReferenceConflict { bound_kind: EntityKind::Booking, .. }
        ));

        let request = resolver
            .resolve(&params(Some("TXN-4"), Some("B-1"), Some("booking")))
            .await
            .unwrap();
        assert_eq!(request, VerificationRequest::new("TXN-4", EntityKind::Booking, "B-1"));
    }

    #[tokio::test]
    async fn test_unrecoverable_reference_is_invalid() {
        let resolver = resolver(Arc::new(InMemoryConfirmationStore::new()));
        let err = resolver
            .resolve(&params(Some("TXN-404"), None, None))
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::InvalidReference { .. }));

        let err = resolver
            .resolve(&params(Some("TXN-404"), Some("X-1"), Some("membership")))
            .await
            .unwrap_err();
        assert!(matches!(err, VerificationError::InvalidReference { .. }));
    }
}
