use nodeboot_core::{
    BootstrapError, BootstrapResult, BootstrapSettings, ConfigManager, DaemonArgs, DaemonEvent,
    DaemonRpc, EventBus, HealthPoller, HostTarget, Notification, NotificationRelay, PollOutcome,
    ProcessError, ProcessManager, ResultCode, ResultSlot, ScheduledTask, SettingsError,
    TerminationResult,
};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, info, info_span, warn};

use crate::factory::PlatformProcessManagerFactory;
use crate::supervisor::ProcessSupervisor;

/// Runs the local daemon bootstrap pipeline:
/// pre-checks, configuration, stale-daemon cleanup, spawn, health polling.
pub struct BootstrapController {
    settings: BootstrapSettings,
    host: HostTarget,
    rpc: Arc<dyn DaemonRpc>,
    events: EventBus,
    config: ConfigManager,
    supervisor: ProcessSupervisor,
    heartbeat: Mutex<Option<ScheduledTask>>,
    cancel: CancellationToken,
    span: Span,
}

impl BootstrapController {
    /// Controller for the current host and its native process manager
    pub fn new(
        settings: BootstrapSettings,
        rpc: Arc<dyn DaemonRpc>,
        events: EventBus,
    ) -> Result<Self, SettingsError> {
        Self::with_host(
            settings,
            HostTarget::current(),
            PlatformProcessManagerFactory::create_process_manager(),
            rpc,
            events,
        )
    }

    pub fn with_host(
        settings: BootstrapSettings,
        host: HostTarget,
        manager: Arc<dyn ProcessManager>,
        rpc: Arc<dyn DaemonRpc>,
        events: EventBus,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;

        let span = info_span!("bootstrap", host = %host);
        let config = ConfigManager::new(
            &settings,
            info_span!(parent: &span, "daemon", component = "config"),
        );
        let supervisor = ProcessSupervisor::new(
            manager,
            settings.pid_path(),
            settings.kill_grace,
            info_span!(parent: &span, "daemon", component = "supervisor"),
        );

        Ok(Self {
            settings,
            host,
            rpc,
            events,
            config,
            supervisor,
            heartbeat: Mutex::new(None),
            cancel: CancellationToken::new(),
            span,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn settings(&self) -> &BootstrapSettings {
        &self.settings
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Whether the post-ready heartbeat is running
    pub fn heartbeat_active(&self) -> bool {
        lock(&self.heartbeat)
            .as_ref()
            .is_some_and(|task| !task.is_cancelled())
    }

    /// Start the local daemon and wait for the single terminal result.
    ///
    /// The result is also broadcast as `daemon.bootstrapped`.
    pub async fn start_local(&self) -> BootstrapResult {
        let (slot, receiver) = ResultSlot::new(self.events.clone());

        if let Err(error) = self.run_pipeline(&slot).instrument(self.span.clone()).await {
            warn!(parent: &self.span, %error, code = error.code().as_u8(), "Daemon bootstrap failed");
            slot.complete(BootstrapResult::from(&error));
        }

        receiver.await.unwrap_or_else(|_| {
            BootstrapResult::failure(
                ResultCode::DaemonUnavailable,
                BootstrapError::Cancelled.user_message(),
            )
        })
    }

    async fn run_pipeline(&self, slot: &ResultSlot) -> Result<(), BootstrapError> {
        // A torn-down session never starts another daemon
        if self.cancel.is_cancelled() {
            return Err(BootstrapError::Cancelled);
        }
        if let Some(pid) = self.supervisor.current_pid() {
            return Err(ProcessError::AlreadyRunning(pid).into());
        }

        info!("Running pre checks");
        let binary = self.pre_check().await?;
        info!(binary = %binary.display(), "Pre-checks complete");

        info!("Init config");
        self.config
            .ensure_config()
            .await
            .map_err(BootstrapError::ConfigInit)?;
        let daemon_config = self
            .config
            .parse_config()
            .await
            .map_err(BootstrapError::ConfigParse)?;

        self.prepare_binary(&binary).await;

        let outcome = self.supervisor.kill_existing().await;
        debug!(?outcome, "Stale daemon check finished");

        self.rpc.initialize_config(&daemon_config);

        let args = DaemonArgs::new(self.config.config_path(), self.config.daemon_dir());
        let spawned = self.supervisor.spawn(&binary, &args).await?;
        let relay = NotificationRelay::new(
            self.events.clone(),
            slot.clone(),
            info_span!(parent: &self.span, "daemon", component = "relay"),
        );
        self.supervisor.install_listeners(spawned, relay);

        let poller = HealthPoller::new(
            self.rpc.clone(),
            self.settings.probe_interval,
            self.settings.probe_attempt_limit,
            info_span!(parent: &self.span, "daemon", component = "health"),
        );
        let resolved = slot.resolved();
        let outcome = tokio::select! {
            outcome = poller.poll_until_ready(self.cancel.child_token()) => outcome,
            _ = resolved.cancelled() => {
                info!("Bootstrap resolved before the daemon became ready, polling stopped");
                return Ok(());
            }
        };

        match outcome {
            PollOutcome::Ready => {
                if slot.complete(BootstrapResult::ready()) {
                    info!("Daemon Ready");
                    self.start_heartbeat();
                }
                Ok(())
            }
            PollOutcome::Cancelled => {
                // Covers a child spawned while teardown was already running
                self.supervisor.teardown();
                Err(BootstrapError::Cancelled)
            }
            PollOutcome::GaveUp { attempts } => Err(BootstrapError::NotReady { attempts }),
        }
    }

    /// Resolve the binary for this host; no filesystem access for unsupported platforms
    async fn pre_check(&self) -> Result<PathBuf, BootstrapError> {
        let map = &self.settings.binary_map;
        if !map.has_valid_daemon(&self.host) {
            return Err(BootstrapError::PlatformUnsupported {
                platform: self.host.to_string(),
            });
        }

        let binary = self.settings.binaries_root.join(map.resolve_path(&self.host)?);
        if !tokio::fs::try_exists(&binary).await.unwrap_or(false) {
            return Err(BootstrapError::BinaryMissing {
                platform: self.host.to_string(),
                path: binary,
            });
        }
        Ok(binary)
    }

    /// Make the bundled binary executable; failures are logged and ignored
    async fn prepare_binary(&self, binary: &Path) {
        if self.host.is_windows() {
            return;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            debug!(binary = %binary.display(), "Chmodding daemon binary");
            let permissions = std::fs::Permissions::from_mode(0o775);
            if let Err(error) = tokio::fs::set_permissions(binary, permissions).await {
                warn!(binary = %binary.display(), %error, "Could not make daemon binary executable");
            }
        }

        #[cfg(not(unix))]
        {
            debug!(binary = %binary.display(), "No permission changes needed on this platform");
        }
    }

    fn start_heartbeat(&self) {
        let events = self.events.clone();
        let period = self.settings.heartbeat_interval;
        info!(?period, "Starting block heartbeat");

        let task = ScheduledTask::every(period, move || {
            events.publish(DaemonEvent::Notification(Notification::Block));
        });
        *lock(&self.heartbeat) = Some(task);
    }

    /// Stop polling and the heartbeat, then ask the daemon to exit without waiting
    pub fn teardown(&self) -> Option<JoinHandle<TerminationResult>> {
        info!(parent: &self.span, "Tearing down local daemon session");
        self.cancel.cancel();
        if let Some(task) = lock(&self.heartbeat).take() {
            task.cancel();
        }
        self.supervisor.teardown()
    }

    /// Signal the daemon and wait for delivery
    pub async fn kill_daemon(&self) -> Option<TerminationResult> {
        self.supervisor.kill_daemon().await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
