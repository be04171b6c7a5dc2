//! Payment verification core
//!
//! Reference resolution, the shared state machine and the polling loop that
//! drives it for bookings, investments and gift codes.

pub mod clock;
pub mod error;
pub mod polling;
pub mod resolver;
pub mod state_machine;
pub mod types;

pub use error::VerificationError;
pub use polling::{BackoffPolicy, PhaseUpdate, PollingController, PollingOutcome};
pub use resolver::{RedirectParams, TransactionReferenceResolver};
pub use state_machine::{RecheckReport, VerificationPolicy, VerificationStateMachine};
pub use types::{ConfirmationRecord, EntityKind, EntityStatus, Phase, VerificationRequest};
