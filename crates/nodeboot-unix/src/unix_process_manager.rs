use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid as NixPid;
use nodeboot_core::{
    OutputStream, ProcessError, ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager,
    ProcessStatus, ProcessTermination, TerminationResult,
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Unix-specific process handle implementation
pub struct UnixProcessHandle {
    child: Child,
    program: PathBuf,
    args: Vec<String>,
}

impl UnixProcessHandle {
    pub fn new(child: Child, program: PathBuf, args: Vec<String>) -> Self {
        Self {
            child,
            program,
            args,
        }
    }
}

#[async_trait]
impl ProcessHandle for UnixProcessHandle {
    fn get_pid(&self) -> Option<ProcessId> {
        self.child.id().map(ProcessId::from)
    }

    fn get_command(&self) -> &Path {
        &self.program
    }

    fn get_args(&self) -> &[String] {
        &self.args
    }

    fn take_stdout(&mut self) -> Option<OutputStream> {
        self.child
            .stdout
            .take()
            .map(|stdout| Box::new(stdout) as OutputStream)
    }

    fn take_stderr(&mut self) -> Option<OutputStream> {
        self.child
            .stderr
            .take()
            .map(|stderr| Box::new(stderr) as OutputStream)
    }

    async fn wait(&mut self) -> Result<ProcessStatus, ProcessError> {
        let status = self.child.wait().await?;
        Ok(ProcessStatus::Exited(status.code()))
    }
}

/// Unix process manager: `tokio::process` to launch, `kill(2)` to terminate
#[derive(Debug, Default)]
pub struct UnixProcessManager;

impl UnixProcessManager {
    pub fn new() -> Self {
        Self
    }
}

fn nix_pid(pid: ProcessId) -> Option<NixPid> {
    // 0 and negative values address process groups, never a single process
    i32::try_from(pid.as_u32())
        .ok()
        .filter(|raw| *raw > 0)
        .map(NixPid::from_raw)
}

#[async_trait]
impl ProcessLifecycle for UnixProcessManager {
    async fn spawn_process(
        &self,
        program: &Path,
        args: &[String],
    ) -> Result<Box<dyn ProcessHandle>, ProcessError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        // Own process group, so terminal signals aimed at the wallet do not reach the daemon
        cmd.process_group(0);

        let child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => {
                ProcessError::PermissionDenied(format!("{}: {e}", program.display()))
            }
            _ => ProcessError::SpawnFailed(format!("{}: {e}", program.display())),
        })?;

        if let Some(pid) = child.id() {
            info!(pid, program = %program.display(), ?args, "Spawned Unix process");
        }

        Ok(Box::new(UnixProcessHandle::new(
            child,
            program.to_path_buf(),
            args.to_vec(),
        )))
    }
}

#[async_trait]
impl ProcessTermination for UnixProcessManager {
    async fn terminate_gracefully(&self, pid: ProcessId) -> TerminationResult {
        let Some(target) = nix_pid(pid) else {
            warn!(%pid, "Refusing to signal an invalid pid");
            return TerminationResult::Failed(format!("invalid pid {pid}"));
        };

        match signal::kill(target, Signal::SIGTERM) {
            Ok(()) => {
                info!(%pid, "Sent SIGTERM to process");
                TerminationResult::Success
            }
            Err(Errno::ESRCH) => {
                info!(%pid, "Process not found (already terminated)");
                TerminationResult::ProcessNotFound
            }
            Err(Errno::EPERM) => {
                warn!(%pid, "Permission denied to terminate process");
                TerminationResult::AccessDenied
            }
            Err(e) => {
                warn!(%pid, error = %e, "Failed to send SIGTERM");
                TerminationResult::Failed(format!("SIGTERM failed: {e}"))
            }
        }
    }
}

impl ProcessManager for UnixProcessManager {
    fn platform_name(&self) -> &'static str {
        "Unix"
    }
}
