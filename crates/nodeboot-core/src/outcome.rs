use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::BootstrapError;
use crate::events::{DaemonEvent, EventBus};

/// Stable result codes shared with the rest of the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum ResultCode {
    Ready = 0,
    UnsupportedPlatform = 1,
    /// Binary missing, spawn failure or a runtime error reported by the daemon
    DaemonUnavailable = 2,
    ConfigInitError = 4,
}

impl ResultCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Terminal value of a bootstrap attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapResult {
    pub result: bool,
    pub code: u8,
    pub message: String,
}

impl BootstrapResult {
    pub fn ready() -> Self {
        Self {
            result: true,
            code: ResultCode::Ready.as_u8(),
            message: "Daemon Ready".to_string(),
        }
    }

    pub fn failure(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            result: false,
            code: code.as_u8(),
            message: message.into(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.result
    }
}

impl From<&BootstrapError> for BootstrapResult {
    fn from(error: &BootstrapError) -> Self {
        Self::failure(error.code(), error.user_message())
    }
}

#[derive(Debug)]
struct SlotInner {
    sender: Mutex<Option<oneshot::Sender<BootstrapResult>>>,
    resolved: CancellationToken,
    events: EventBus,
}

/// Single-resolution result channel.
///
/// Any number of clones may race to [`complete`](ResultSlot::complete) it; only
/// the first call delivers a value and broadcasts `daemon.bootstrapped`.
#[derive(Debug, Clone)]
pub struct ResultSlot {
    inner: Arc<SlotInner>,
}

impl ResultSlot {
    pub fn new(events: EventBus) -> (Self, oneshot::Receiver<BootstrapResult>) {
        let (sender, receiver) = oneshot::channel();
        let slot = Self {
            inner: Arc::new(SlotInner {
                sender: Mutex::new(Some(sender)),
                resolved: CancellationToken::new(),
                events,
            }),
        };
        (slot, receiver)
    }

    /// Resolve the slot. Returns `false` if it was already resolved.
    pub fn complete(&self, result: BootstrapResult) -> bool {
        let sender = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let Some(sender) = sender else {
            debug!(code = result.code, message = %result.message, "Bootstrap result already resolved, ignoring");
            return false;
        };

        self.inner.resolved.cancel();
        self.inner
            .events
            .publish(DaemonEvent::Bootstrapped(result.clone()));
        // The receiver may be gone if the caller stopped waiting
        let _ = sender.send(result);
        true
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.resolved.is_cancelled()
    }

    /// Token cancelled once the slot has been resolved
    pub fn resolved(&self) -> CancellationToken {
        self.inner.resolved.clone()
    }
}
