use nodeboot_core::{
    BootstrapError, DaemonArgs, NotificationRelay, ProcessError, ProcessHandle, ProcessId,
    ProcessManager, ProcessStatus, TerminationResult,
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, info, warn};

/// What [`ProcessSupervisor::kill_existing`] found
#[derive(Debug, Clone, PartialEq)]
pub enum KillOutcome {
    /// No pid record on disk
    NoRecord,
    /// The record could not be read or did not hold a pid
    Unreadable,
    /// Termination requested and the grace period elapsed; exit is not confirmed
    Signalled(ProcessId),
    /// No process with the recorded pid
    AlreadyGone(ProcessId),
    /// The record names the child this supervisor is running; left alone
    Supervised(ProcessId),
    /// The signal could not be delivered
    SignalFailed(ProcessId, TerminationResult),
}

/// A freshly spawned daemon whose listeners are not installed yet
pub struct SpawnedDaemon {
    pub pid: ProcessId,
    handle: Box<dyn ProcessHandle>,
}

/// Owns the single daemon child of this session and its pid record
pub struct ProcessSupervisor {
    manager: Arc<dyn ProcessManager>,
    pid_path: PathBuf,
    kill_grace: Duration,
    current: Arc<Mutex<Option<ProcessId>>>,
    span: Span,
}

impl ProcessSupervisor {
    pub fn new(
        manager: Arc<dyn ProcessManager>,
        pid_path: PathBuf,
        kill_grace: Duration,
        span: Span,
    ) -> Self {
        Self {
            manager,
            pid_path,
            kill_grace,
            current: Arc::new(Mutex::new(None)),
            span,
        }
    }

    pub fn pid_path(&self) -> &Path {
        &self.pid_path
    }

    /// Pid of the live child, if any
    pub fn current_pid(&self) -> Option<ProcessId> {
        *lock(&self.current)
    }

    /// Terminate a daemon left behind by a previous session.
    ///
    /// Never fails: every outcome lets the bootstrap continue.
    pub async fn kill_existing(&self) -> KillOutcome {
        async {
            let raw = match fs::read_to_string(&self.pid_path).await {
                Ok(raw) => raw,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!(path = %self.pid_path.display(), "No pid record, nothing to kill");
                    return KillOutcome::NoRecord;
                }
                Err(e) => {
                    warn!(path = %self.pid_path.display(), error = %e, "Could not read pid record");
                    return KillOutcome::Unreadable;
                }
            };

            let Ok(pid) = raw.parse::<ProcessId>() else {
                warn!(path = %self.pid_path.display(), "Pid record does not contain a pid");
                return KillOutcome::Unreadable;
            };

            if self.current_pid() == Some(pid) {
                debug!(%pid, "Pid record belongs to the supervised daemon, not killing it");
                return KillOutcome::Supervised(pid);
            }

            match self.manager.terminate_gracefully(pid).await {
                TerminationResult::Success => {
                    tokio::time::sleep(self.kill_grace).await;
                    info!(%pid, "Signalled daemon from previous session");
                    KillOutcome::Signalled(pid)
                }
                TerminationResult::ProcessNotFound => {
                    info!(%pid, "Error trying to kill with pid, most likely no process exists with that pid");
                    KillOutcome::AlreadyGone(pid)
                }
                result => {
                    warn!(%pid, ?result, "Could not signal daemon from previous session");
                    KillOutcome::SignalFailed(pid, result)
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }

    /// Launch the daemon and record its pid, overwriting any previous record
    pub async fn spawn(
        &self,
        program: &Path,
        args: &DaemonArgs,
    ) -> Result<SpawnedDaemon, BootstrapError> {
        if let Some(pid) = self.current_pid() {
            return Err(ProcessError::AlreadyRunning(pid).into());
        }

        let args = args.to_args();
        debug!(parent: &self.span, program = %program.display(), ?args, "Spawning daemon");
        let handle = self
            .manager
            .spawn_process(program, &args)
            .instrument(self.span.clone())
            .await
            .inspect_err(|e| warn!(parent: &self.span, error = %e, "Failed to spawn daemon"))?;

        let Some(pid) = handle.get_pid() else {
            return Err(ProcessError::MissingPid.into());
        };

        if let Err(source) = fs::write(&self.pid_path, pid.to_string()).await {
            warn!(parent: &self.span, %pid, error = %source, "Failed to save daemon pid, stopping it");
            self.manager.terminate_gracefully(pid).await;
            return Err(ProcessError::PidWrite {
                path: self.pid_path.clone(),
                source,
            }
            .into());
        }

        *lock(&self.current) = Some(pid);
        info!(parent: &self.span, %pid, "Daemon spawned");
        Ok(SpawnedDaemon { pid, handle })
    }

    /// Relay the child's output and clean up after it exits.
    ///
    /// Returns the task that resolves once the child has exited and its pid
    /// record is gone.
    pub fn install_listeners(
        &self,
        spawned: SpawnedDaemon,
        relay: NotificationRelay,
    ) -> JoinHandle<ProcessStatus> {
        let SpawnedDaemon { pid, mut handle } = spawned;

        if let Some(stdout) = handle.take_stdout() {
            tokio::spawn(relay.clone().relay_stdout(stdout));
        }
        if let Some(stderr) = handle.take_stderr() {
            tokio::spawn(relay.relay_stderr(stderr));
        }

        let pid_path = self.pid_path.clone();
        let current = self.current.clone();
        tokio::spawn(
            async move {
                let status = handle
                    .wait()
                    .await
                    .unwrap_or_else(|e| ProcessStatus::Failed(e.to_string()));
                info!(%pid, ?status, "Daemon child process has ended");

                match fs::remove_file(&pid_path).await {
                    Ok(()) => debug!(path = %pid_path.display(), "Removed pid record"),
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => warn!(path = %pid_path.display(), error = %e, "Could not remove pid record"),
                }

                let mut tracked = lock(&current);
                if *tracked == Some(pid) {
                    *tracked = None;
                }
                status
            }
            .instrument(self.span.clone()),
        )
    }

    /// Ask the child to exit without waiting for it
    pub fn teardown(&self) -> Option<JoinHandle<TerminationResult>> {
        let pid = self.current_pid()?;
        let manager = self.manager.clone();
        info!(parent: &self.span, %pid, "Tearing down daemon");

        Some(tokio::spawn(
            async move {
                let result = manager.terminate_gracefully(pid).await;
                debug!(%pid, ?result, "Daemon termination requested");
                result
            }
            .instrument(self.span.clone()),
        ))
    }

    /// Signal the child and wait for the signal to be delivered
    pub async fn kill_daemon(&self) -> Option<TerminationResult> {
        let pid = self.current_pid()?;
        let result = self
            .manager
            .terminate_gracefully(pid)
            .instrument(self.span.clone())
            .await;
        info!(parent: &self.span, %pid, ?result, "Daemon killed");
        Some(result)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
