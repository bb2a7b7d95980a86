use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info};

use crate::error::{RpcError, RpcErrorCode};
use crate::rpc::DaemonRpc;

/// Daemon answer meaning "operation invalid on an unencrypted wallet"; the
/// daemon is up, which is all the probe needs to know
pub const UNENCRYPTED_WALLET_CODE: i64 = -15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Polling,
    Ready,
}

/// How a single probe result is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    Ready,
    /// Nothing is listening yet
    StillStarting,
    /// Error without a recognisable code
    Unrecognized,
    /// Any other daemon error code; keep polling
    Other(i64),
}

impl ProbeVerdict {
    pub fn is_ready(self) -> bool {
        matches!(self, ProbeVerdict::Ready)
    }
}

pub fn classify_probe(result: &Result<(), RpcError>) -> ProbeVerdict {
    match result {
        Ok(()) => ProbeVerdict::Ready,
        Err(error) => match error.code() {
            Some(RpcErrorCode::ConnectionRefused) => ProbeVerdict::StillStarting,
            Some(RpcErrorCode::Numeric(UNENCRYPTED_WALLET_CODE)) => ProbeVerdict::Ready,
            Some(RpcErrorCode::Numeric(code)) => ProbeVerdict::Other(code),
            None => ProbeVerdict::Unrecognized,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Ready,
    Cancelled,
    /// Attempt limit reached without a ready answer
    GaveUp { attempts: u32 },
}

/// Probes the daemon on a fixed interval until it answers
pub struct HealthPoller {
    rpc: Arc<dyn DaemonRpc>,
    probe_interval: Duration,
    attempt_limit: Option<u32>,
    state: RwLock<HealthState>,
    span: Span,
}

impl HealthPoller {
    pub fn new(
        rpc: Arc<dyn DaemonRpc>,
        probe_interval: Duration,
        attempt_limit: Option<u32>,
        span: Span,
    ) -> Self {
        Self {
            rpc,
            probe_interval,
            attempt_limit,
            state: RwLock::new(HealthState::Polling),
            span,
        }
    }

    pub fn state(&self) -> HealthState {
        *self
            .state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: HealthState) {
        *self
            .state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = state;
    }

    /// Probe once per interval, first probe one interval from now.
    ///
    /// The probe stops as soon as the daemon is ready; an in-flight probe is
    /// abandoned when `cancel` fires.
    pub async fn poll_until_ready(&self, cancel: CancellationToken) -> PollOutcome {
        self.poll_loop(cancel).instrument(self.span.clone()).await
    }

    async fn poll_loop(&self, cancel: CancellationToken) -> PollOutcome {
        self.set_state(HealthState::Polling);
        let mut interval =
            tokio::time::interval_at(Instant::now() + self.probe_interval, self.probe_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts: u32 = 0;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                _ = interval.tick() => {}
            }

            attempts += 1;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollOutcome::Cancelled,
                result = self.rpc.probe() => result,
            };

            match classify_probe(&result) {
                ProbeVerdict::Ready => {
                    if result.is_err() {
                        debug!(code = UNENCRYPTED_WALLET_CODE, "Wallet not encrypted, daemon is up");
                    }
                    info!(attempts, "Daemon has started");
                    self.set_state(HealthState::Ready);
                    return PollOutcome::Ready;
                }
                ProbeVerdict::StillStarting => debug!(attempts, "Daemon still not started"),
                ProbeVerdict::Unrecognized => {
                    if let Err(error) = &result {
                        debug!(attempts, %error, "Daemon still not started, unrecognised rpc error");
                    }
                }
                ProbeVerdict::Other(code) => {
                    if let Err(error) = &result {
                        debug!(attempts, code, %error, "Daemon probe returned an error");
                    }
                }
            }

            if self.attempt_limit.is_some_and(|limit| attempts >= limit) {
                info!(attempts, "Giving up on daemon health probe");
                return PollOutcome::GaveUp { attempts };
            }
        }
    }
}
