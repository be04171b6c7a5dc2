//! Polling controller
//!
//! Drives [`VerificationStateMachine::step`] for one open confirmation view
//! at growing intervals until the phase is terminal, the view goes away or
//! the process shuts down. Expiry is decided by the state machine, not here.

use crate::logging::mask_reference;
use crate::verification::clock::Scheduler;
use crate::verification::error::VerificationError;
use crate::verification::state_machine::VerificationStateMachine;
use crate::verification::types::{Phase, VerificationRequest};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Store errors tolerated in a row before the loop gives up
    pub max_consecutive_errors: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(8),
            max_consecutive_errors: 3,
        }
    }
}

impl BackoffPolicy {
    /// Wait after the `step`-th attempt (1-based): doubling, capped
    pub fn delay_for(&self, step: u32) -> Duration {
        let exponent = step.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Phase reported to the view after every step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseUpdate {
    pub phase: Phase,
    pub message: String,
    pub terminal: bool,
    pub step: u32,
    /// `None` once terminal
    pub next_poll_secs: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingOutcome {
    Finished(Phase),
    Cancelled { last_phase: Option<Phase> },
}

pub struct PollingController {
    machine: Arc<VerificationStateMachine>,
    scheduler: Arc<dyn Scheduler>,
    policy: BackoffPolicy,
}

impl PollingController {
    pub fn new(
        machine: Arc<VerificationStateMachine>,
        scheduler: Arc<dyn Scheduler>,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            machine,
            scheduler,
            policy,
        }
    }

    /// Poll until terminal or cancelled.
    ///
    /// Cancellation is `true` on `cancel` or the `updates` receiver being
    /// dropped. Only the local loop stops; the record is left as stored.
    #[instrument(skip_all, fields(reference = %mask_reference(&request.reference)))]
    pub async fn run(
        &self,
        request: VerificationRequest,
        updates: mpsc::Sender<PhaseUpdate>,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<PollingOutcome, VerificationError> {
        let mut last_phase = None;
        let mut consecutive_errors = 0u32;
        let mut watching = true;
        let mut step = 0u32;

        loop {
            if *cancel.borrow() || updates.is_closed() {
                debug!(step, "Polling cancelled before next step");
                return Ok(PollingOutcome::Cancelled { last_phase });
            }
            step += 1;

            match self.machine.step(&request).await {
                Ok(phase) => {
                    consecutive_errors = 0;
                    last_phase = Some(phase);

                    let terminal = phase.is_terminal();
                    let delay = self.policy.delay_for(step);
                    let update = PhaseUpdate {
                        phase,
                        message: phase.message(request.entity_kind),
                        terminal,
                        step,
                        next_poll_secs: (!terminal).then(|| delay.as_secs()),
                    };
                    if updates.send(update).await.is_err() {
                        return Ok(PollingOutcome::Cancelled { last_phase });
                    }
                    if terminal {
                        info!(phase = %phase, steps = step, "Polling finished");
                        return Ok(PollingOutcome::Finished(phase));
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    consecutive_errors += 1;
                    warn!(
                        step,
                        consecutive_errors,
                        error = %e,
                        "Verification step failed"
                    );
                    if consecutive_errors >= self.policy.max_consecutive_errors {
                        return Err(e);
                    }
                }
            }

            let delay = self.policy.delay_for(step);
            if self.pause(delay, &updates, &mut cancel, &mut watching).await {
                debug!(step, "Polling cancelled while waiting");
                return Ok(PollingOutcome::Cancelled { last_phase });
            }
        }
    }

    /// Sleep for `delay`; `true` when cancelled first
    async fn pause(
        &self,
        delay: Duration,
        updates: &mpsc::Sender<PhaseUpdate>,
        cancel: &mut watch::Receiver<bool>,
        watching: &mut bool,
    ) -> bool {
        let sleep = self.scheduler.sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                changed = cancel.changed(), if *watching => match changed {
                    Ok(()) if *cancel.borrow() => return true,
                    Ok(()) => {}
                    // Sender gone: nothing can cancel any more
                    Err(_) => *watching = false,
                },
                _ = updates.closed() => return true,
            }
        }
    }
}
