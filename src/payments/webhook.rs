//! Paystack webhook verification and parsing
//!
//! The `x-paystack-signature` header carries the hex HMAC-SHA512 of the raw
//! request body keyed with the secret key. Only charge outcomes are turned
//! into notifications; every other event is acknowledged and ignored.

use crate::payments::gateway::GatewayStatus;
use crate::verification::types::EntityKind;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha512;

pub const SIGNATURE_HEADER: &str = "x-paystack-signature";

type HmacSha512 = Hmac<Sha512>;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("missing x-paystack-signature header")]
    MissingSignature,

    #[error("webhook signature does not match")]
    InvalidSignature,

    #[error("webhook secret is not configured")]
    SecretNotConfigured,

    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
}

/// A definitive payment outcome pushed by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentNotification {
    pub reference: String,
    pub status: GatewayStatus,
    /// Entity named in the transaction metadata, if any
    pub entity: Option<(EntityKind, String)>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    event: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    reference: String,
    #[serde(default)]
    metadata: Value,
}

/// Constant-time check of the body signature
pub fn verify_signature(secret: &str, body: &[u8], signature: Option<&str>) -> Result<(), WebhookError> {
    if secret.is_empty() {
        return Err(WebhookError::SecretNotConfigured);
    }
    let signature = signature
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(WebhookError::MissingSignature)?;
    let expected = hex::decode(signature).map_err(|_| WebhookError::InvalidSignature)?;

    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::SecretNotConfigured)?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| WebhookError::InvalidSignature)
}

/// Hex signature Paystack would send for `body`
pub fn sign(secret: &str, body: &[u8]) -> Result<String, WebhookError> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::SecretNotConfigured)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Parse a verified webhook body. `None` for events that carry no payment
/// outcome.
pub fn parse_notification(body: &[u8]) -> Result<Option<PaymentNotification>, WebhookError> {
    let event: WebhookEvent =
        serde_json::from_slice(body).map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

    let status = match event.event.as_str() {
        "charge.success" => GatewayStatus::Succeeded,
        "charge.failed" => GatewayStatus::Failed,
        _ => return Ok(None),
    };

    let reference = event.data.reference.trim().to_string();
    if reference.is_empty() {
        return Err(WebhookError::MalformedPayload(
            "data.reference is empty".to_string(),
        ));
    }

    Ok(Some(PaymentNotification {
        reference,
        status,
        entity: metadata_entity(&event.data.metadata),
    }))
}

fn metadata_entity(metadata: &Value) -> Option<(EntityKind, String)> {
    let kind = metadata
        .get("entity_kind")
        .and_then(Value::as_str)
        .and_then(EntityKind::from_hint)?;
    let id = match metadata.get("entity_id")? {
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some((kind, id))
}
