//! Payment status gateway boundary
//!
//! The verification core only ever asks a provider one question: what is the
//! status of this reference. Everything provider specific stays behind
//! [`PaymentStatusGateway`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provider answer for a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Pending,
    Succeeded,
    Failed,
    NotFound,
}

impl GatewayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayStatus::Pending => "pending",
            GatewayStatus::Succeeded => "succeeded",
            GatewayStatus::Failed => "failed",
            GatewayStatus::NotFound => "not_found",
        }
    }
}

impl fmt::Display for GatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors talking to the provider. None of these say anything about the
/// payment itself; callers keep verifying.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("gateway returned HTTP {status}")]
    Http { status: u16 },

    #[error("gateway transport error: {0}")]
    Transport(String),

    #[error("unexpected gateway response: {0}")]
    Decode(String),

    #[error("gateway misconfigured: {0}")]
    Configuration(String),
}

#[async_trait]
pub trait PaymentStatusGateway: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &'static str;

    async fn check_status(&self, reference: &str) -> Result<GatewayStatus, GatewayError>;
}
