//! Application-wide daemon events.
//!
//! Subscribers hold a [`broadcast::Receiver`]; dropping it unsubscribes.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::outcome::BootstrapResult;

const DEFAULT_CAPACITY: usize = 64;

/// Notification kinds relayed from the daemon's notify hooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Notification {
    Block,
    Alert,
    Wallet,
}

impl Notification {
    /// Keyword the notify hook prints, e.g. `BLOCK:<hash>`
    pub fn keyword(&self) -> &'static str {
        match self {
            Notification::Block => "BLOCK",
            Notification::Alert => "ALERT",
            Notification::Wallet => "WALLET",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DaemonEvent {
    /// Terminal bootstrap result
    Bootstrapped(BootstrapResult),
    /// Relayed or synthetic notification, no payload
    Notification(Notification),
}

impl DaemonEvent {
    /// Event name as seen by the rest of the application
    pub fn name(&self) -> &'static str {
        match self {
            DaemonEvent::Bootstrapped(_) => "daemon.bootstrapped",
            DaemonEvent::Notification(Notification::Block) => "daemon.notifications.block",
            DaemonEvent::Notification(Notification::Alert) => "daemon.notifications.alert",
            DaemonEvent::Notification(Notification::Wallet) => "daemon.notifications.wallet",
        }
    }
}

/// Publish/subscribe channel for [`DaemonEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DaemonEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Publish to all current subscribers. Having none is not an error.
    pub fn publish(&self, event: DaemonEvent) {
        let name = event.name();
        match self.sender.send(event) {
            Ok(receivers) => trace!(event = name, receivers, "Published daemon event"),
            Err(_) => trace!(event = name, "No subscribers for daemon event"),
        }
    }
}
