//! Turns the daemon's standard streams into application events.

use futures::StreamExt;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{Instrument, Span, debug, info, warn};

use crate::events::{DaemonEvent, EventBus, Notification};
use crate::outcome::{BootstrapResult, ResultCode, ResultSlot};
use crate::process::OutputStream;

const MAX_LINE_LENGTH: usize = 64 * 1024;

const CORRUPT_DB_SIGNATURE: &str = "Corrupted block database detected";
pub const CORRUPT_DB_MESSAGE: &str =
    "Corrupt block database detected, please reindex or delete the block database to rebuild it.";

/// Interpretation of one stderr line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StderrVerdict {
    /// Exec failure or an explicit error from the daemon
    pub fatal: bool,
    /// Message reported as the bootstrap failure
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct NotificationRelay {
    events: EventBus,
    slot: ResultSlot,
    span: Span,
}

impl NotificationRelay {
    pub fn new(events: EventBus, slot: ResultSlot, span: Span) -> Self {
        Self { events, slot, span }
    }

    /// First matching keyword wins, checked in the order BLOCK, ALERT, WALLET
    pub fn classify_stdout(line: &str) -> Option<Notification> {
        [Notification::Block, Notification::Alert, Notification::Wallet]
            .into_iter()
            .find(|notification| line.contains(notification.keyword()))
    }

    pub fn classify_stderr(line: &str) -> StderrVerdict {
        let fatal = line.starts_with("execvp()") || line.to_lowercase().contains("error");
        let message = if line.contains(CORRUPT_DB_SIGNATURE) {
            CORRUPT_DB_MESSAGE.to_string()
        } else {
            line.to_string()
        };
        StderrVerdict { fatal, message }
    }

    pub fn handle_stdout_line(&self, line: &str) {
        if let Some(notification) = Self::classify_stdout(line) {
            info!(parent: &self.span, kind = notification.keyword(), line, "Daemon notification");
            self.events.publish(DaemonEvent::Notification(notification));
        }
    }

    /// Any stderr output fails a pending bootstrap, matched or not
    pub fn handle_stderr_line(&self, line: &str) {
        let verdict = Self::classify_stderr(line);
        if verdict.fatal {
            warn!(parent: &self.span, line, "Failed to start child process");
        } else {
            debug!(parent: &self.span, line, "Daemon wrote to stderr");
        }

        let resolved = self.slot.complete(BootstrapResult::failure(
            ResultCode::DaemonUnavailable,
            verdict.message,
        ));
        if !resolved {
            debug!(parent: &self.span, "Bootstrap already resolved, stderr line only logged");
        }
    }

    pub async fn relay_stdout(self, stream: OutputStream) {
        let span = self.span.clone();
        self.relay(stream, "stdout", |relay, line| relay.handle_stdout_line(line))
            .instrument(span)
            .await
    }

    pub async fn relay_stderr(self, stream: OutputStream) {
        let span = self.span.clone();
        self.relay(stream, "stderr", |relay, line| relay.handle_stderr_line(line))
            .instrument(span)
            .await
    }

    async fn relay<F>(&self, stream: OutputStream, name: &'static str, handle: F)
    where
        F: Fn(&Self, &str),
    {
        let mut lines = FramedRead::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));

        while let Some(line) = lines.next().await {
            match line {
                Ok(line) => handle(self, &line),
                Err(LinesCodecError::MaxLineLengthExceeded) => {
                    warn!(stream = name, "Discarded overlong daemon output line");
                }
                Err(LinesCodecError::Io(error)) => {
                    warn!(stream = name, %error, "Stopped reading daemon output");
                    break;
                }
            }
        }
        debug!(stream = name, "Daemon output stream closed");
    }
}
