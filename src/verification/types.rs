//! Verification domain types
//!
//! Shared by the confirmation store, the state machine and the HTTP layer.
//! Every persisted value has a stable lowercase string form used both in the
//! database and on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Entity kinds
// ============================================================================

/// The three payment contexts that share the verification flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Booking,
    Investment,
    Gift,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Booking => "booking",
            EntityKind::Investment => "investment",
            EntityKind::Gift => "gift",
        }
    }

    /// Strict parse of the stored form
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "booking" => Some(EntityKind::Booking),
            "investment" => Some(EntityKind::Investment),
            "gift" => Some(EntityKind::Gift),
            _ => None,
        }
    }

    /// Lenient parse of a redirect or webhook hint
    pub fn from_hint(hint: &str) -> Option<Self> {
        match hint.trim().to_lowercase().as_str() {
            "booking" | "shortlet" | "short-let" | "short_let" => Some(EntityKind::Booking),
            "investment" | "invest" => Some(EntityKind::Investment),
            "gift" | "gift-code" | "gift_code" | "giftcode" => Some(EntityKind::Gift),
            _ => None,
        }
    }

    /// Table holding this kind's domain entities
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Booking => "bookings",
            EntityKind::Investment => "investment_positions",
            EntityKind::Gift => "gift_redemptions",
        }
    }

    /// Status change applied when the payment is confirmed. Already-active
    /// entities are accepted.
    pub fn activate(&self) -> EntityTransition {
        EntityTransition {
            kind: *self,
            from: &[EntityStatus::Unpaid, EntityStatus::Active],
            to: EntityStatus::Active,
        }
    }

    /// Status change applied when the payment definitively failed
    pub fn revert(&self) -> EntityTransition {
        match self {
            // Reserved investment slots are released even after a manual activation.
            EntityKind::Investment => EntityTransition {
                kind: *self,
                from: &[EntityStatus::Unpaid, EntityStatus::Active],
                to: EntityStatus::Unpaid,
            },
            EntityKind::Booking | EntityKind::Gift => EntityTransition {
                kind: *self,
                from: &[EntityStatus::Unpaid],
                to: EntityStatus::Unpaid,
            },
        }
    }

    /// Human label used in user-facing messages
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Booking => "booking",
            EntityKind::Investment => "investment",
            EntityKind::Gift => "gift code",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Entity status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Unpaid,
    Active,
    Cancelled,
}

impl EntityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityStatus::Unpaid => "unpaid",
            EntityStatus::Active => "active",
            EntityStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "unpaid" => Some(EntityStatus::Unpaid),
            "active" => Some(EntityStatus::Active),
            "cancelled" => Some(EntityStatus::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for EntityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status change a store applies to a domain entity together with a record's
/// terminal transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityTransition {
    pub kind: EntityKind,
    /// Statuses the entity may be in for the change to apply
    pub from: &'static [EntityStatus],
    pub to: EntityStatus,
}

impl EntityTransition {
    pub fn applies_to(&self, status: EntityStatus) -> bool {
        self.from.contains(&status)
    }
}

/// A booking, investment position or gift redemption as seen by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEntity {
    pub kind: EntityKind,
    pub id: String,
    pub status: EntityStatus,
    /// Number of status writes applied through the confirmation store
    pub revision: u32,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Verification phases
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pending,
    Verifying,
    Confirmed,
    Failed,
    Expired,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Pending => "pending",
            Phase::Verifying => "verifying",
            Phase::Confirmed => "confirmed",
            Phase::Failed => "failed",
            Phase::Expired => "expired",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Phase::Pending),
            "verifying" => Some(Phase::Verifying),
            "confirmed" => Some(Phase::Confirmed),
            "failed" => Some(Phase::Failed),
            "expired" => Some(Phase::Expired),
            _ => None,
        }
    }

    /// Confirmed, Failed and Expired are permanent
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Confirmed | Phase::Failed | Phase::Expired)
    }

    /// User-facing message for the confirmation page
    pub fn message(&self, kind: EntityKind) -> String {
        match self {
            Phase::Pending | Phase::Verifying => {
                "Verifying your payment, this usually takes a few seconds…".to_string()
            }
            Phase::Confirmed => format!("Payment confirmed. Your {} is now active.", kind.label()),
            Phase::Failed => format!(
                "Payment failed. Your {} was not charged and remains unpaid.",
                kind.label()
            ),
            Phase::Expired => "Verification timed out. If you were charged, use \"check again\" \
                               or contact support with your payment reference."
                .to_string(),
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal outcome a record can be resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Confirmed,
    Failed,
    Expired,
}

impl Resolution {
    pub fn phase(&self) -> Phase {
        match self {
            Resolution::Confirmed => Phase::Confirmed,
            Resolution::Failed => Phase::Failed,
            Resolution::Expired => Phase::Expired,
        }
    }
}

/// Result of a compare-and-set resolution attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// This call moved the record to a terminal phase
    Applied(Phase),
    /// The record was already terminal; nothing was written
    AlreadyResolved(Phase),
}

impl ResolveOutcome {
    pub fn phase(&self) -> Phase {
        match self {
            ResolveOutcome::Applied(phase) | ResolveOutcome::AlreadyResolved(phase) => *phase,
        }
    }
}

// ============================================================================
// Requests and records
// ============================================================================

/// A validated request to verify one payment reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRequest {
    pub reference: String,
    pub entity_kind: EntityKind,
    pub entity_id: String,
}

impl VerificationRequest {
    pub fn new(reference: impl Into<String>, entity_kind: EntityKind, entity_id: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            entity_kind,
            entity_id: entity_id.into(),
        }
    }
}

/// Durable verification state for one reference
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfirmationRecord {
    pub reference: String,
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub phase: Phase,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ConfirmationRecord {
    pub fn new(request: &VerificationRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            reference: request.reference.clone(),
            entity_kind: request.entity_kind,
            entity_id: request.entity_id.clone(),
            phase: Phase::Pending,
            attempts: 0,
            created_at,
            resolved_at: None,
        }
    }

    /// Whether the record is bound to the same entity as `request`
    pub fn binds(&self, entity_kind: EntityKind, entity_id: &str) -> bool {
        self.entity_kind == entity_kind && self.entity_id == entity_id
    }

    pub fn request(&self) -> VerificationRequest {
        VerificationRequest::new(self.reference.clone(), self.entity_kind, self.entity_id.clone())
    }
}
