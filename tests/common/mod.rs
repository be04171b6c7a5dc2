//! Shared fixtures for verification integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use estatehub_backend::database::InMemoryConfirmationStore;
use estatehub_backend::payments::gateway::{GatewayError, GatewayStatus, PaymentStatusGateway};
use estatehub_backend::verification::clock::ManualClock;
use estatehub_backend::verification::types::{EntityKind, EntityStatus};
use estatehub_backend::verification::{VerificationPolicy, VerificationStateMachine};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Gateway that replays a fixed script, then repeats `fallback`
pub struct ScriptedGateway {
    script: Mutex<VecDeque<Result<GatewayStatus, GatewayError>>>,
    fallback: GatewayStatus,
    calls: AtomicUsize,
}

impl ScriptedGateway {
    pub fn new(script: Vec<Result<GatewayStatus, GatewayError>>, fallback: GatewayStatus) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn always(status: GatewayStatus) -> Self {
        Self::new(Vec::new(), status)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentStatusGateway for ScriptedGateway {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn check_status(&self, _reference: &str) -> Result<GatewayStatus, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or(Ok(self.fallback))
    }
}

pub struct Harness {
    pub store: Arc<InMemoryConfirmationStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub clock: ManualClock,
    pub machine: Arc<VerificationStateMachine>,
}

pub fn policy(max_attempts: u32) -> VerificationPolicy {
    VerificationPolicy {
        max_attempts,
        deadline: Duration::from_secs(600),
    }
}

pub fn start_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

/// State machine over an in-memory store seeded with unpaid entities
/// B-1, B-4 (bookings), I-9 (investment) and G-5 (gift)
pub async fn harness(gateway: ScriptedGateway, policy: VerificationPolicy) -> Harness {
    let store = Arc::new(InMemoryConfirmationStore::new());
    for (kind, id) in [
        (EntityKind::Booking, "B-1"),
        (EntityKind::Booking, "B-4"),
        (EntityKind::Investment, "I-9"),
        (EntityKind::Gift, "G-5"),
    ] {
        store.insert_entity(kind, id, EntityStatus::Unpaid).await;
    }

    let gateway = Arc::new(gateway);
    let clock = ManualClock::new(start_time());
    let machine = Arc::new(VerificationStateMachine::new(
        store.clone(),
        gateway.clone(),
        Arc::new(clock.clone()),
        policy,
    ));

    Harness {
        store,
        gateway,
        clock,
        machine,
    }
}
