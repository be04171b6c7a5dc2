use crate::database::StoreError;
use crate::verification::types::EntityKind;

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("invalid payment reference: {reason}")]
    InvalidReference { reason: String },

    #[error("reference {reference} is already bound to {bound_kind} {bound_id}")]
    ReferenceConflict {
        reference: String,
        bound_kind: EntityKind,
        bound_id: String,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl VerificationError {
    pub fn invalid_reference(reason: impl Into<String>) -> Self {
        VerificationError::InvalidReference {
            reason: reason.into(),
        }
    }

    /// Fatal errors end verification before or during polling; store errors
    /// may clear up on a later attempt.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VerificationError::InvalidReference { .. } | VerificationError::ReferenceConflict { .. }
        )
    }
}

impl From<StoreError> for VerificationError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ReferenceConflict {
                reference,
                bound_kind,
                bound_id,
            } => VerificationError::ReferenceConflict {
                reference,
                bound_kind,
                bound_id,
            },
            other => VerificationError::Store(other),
        }
    }
}
