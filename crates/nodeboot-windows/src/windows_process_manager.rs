use async_trait::async_trait;
use nodeboot_core::{
    OutputStream, ProcessError, ProcessHandle, ProcessId, ProcessLifecycle, ProcessManager,
    ProcessStatus, ProcessTermination, TerminationResult,
};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Creates a process without a console window
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Windows-specific process handle implementation
pub struct WindowsProcessHandle {
    child: Child,
    program: PathBuf,
    args: Vec<String>,
}

impl WindowsProcessHandle {
    pub fn new(child: Child, program: PathBuf, args: Vec<String>) -> Self {
        Self {
            child,
            program,
            args,
        }
    }
}

#[async_trait]
impl ProcessHandle for WindowsProcessHandle {
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

/// Windows process manager: `taskkill` to terminate, `sysinfo` to check existence
#[derive(Debug, Default)]
pub struct WindowsProcessManager;

impl WindowsProcessManager {
    pub fn new() -> Self {
        Self
    }

    fn process_exists(pid: ProcessId) -> bool {
        let pid = Pid::from_u32(pid.as_u32());
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::default(),
        );
        system.process(pid).is_some()
    }

    async fn taskkill(pid: ProcessId, force: bool) -> std::io::Result<bool> {
        let pid_string = pid.to_string();
        let mut args = vec!["/PID", pid_string.as_str()];
        if force {
            args.push("/F");
        }

        let output = Command::new("taskkill")
            .args(&args)
            .creation_flags(CREATE_NO_WINDOW)
            .output()
            .await?;
        Ok(output.status.success())
    }
}

#[async_trait]
impl ProcessLifecycle for WindowsProcessManager {
    async fn spawn_process(
        &self,
        program: &Path,
        args: &[String],
    ) -> Result<Box<dyn ProcessHandle>, ProcessError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .creation_flags(CREATE_NO_WINDOW);

        let child = cmd.spawn().map_err(|e| match e.kind() {
            ErrorKind::PermissionDenied => {
                ProcessError::PermissionDenied(format!("{}: {e}", program.display()))
            }
            _ => ProcessError::SpawnFailed(format!("{}: {e}", program.display())),
        })?;

        if let Some(pid) = child.id() {
            info!(pid, program = %program.display(), ?args, "Spawned Windows process");
        }

        Ok(Box::new(WindowsProcessHandle::new(
            child,
            program.to_path_buf(),
            args.to_vec(),
        )))
    }
}

#[async_trait]
impl ProcessTermination for WindowsProcessManager {
    async fn terminate_gracefully(&self, pid: ProcessId) -> TerminationResult {
        if pid.as_u32() == 0 || !Self::process_exists(pid) {
            info!(%pid, "Process not found (already terminated)");
            return TerminationResult::ProcessNotFound;
        }

        // Windowless daemons ignore the close request, escalate when it is refused
        for force in [false, true] {
            match Self::taskkill(pid, force).await {
                Ok(true) => {
                    info!(%pid, force, "Terminated process with taskkill");
                    return TerminationResult::Success;
                }
                Ok(false) => warn!(%pid, force, "taskkill did not terminate process"),
                Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                    return TerminationResult::AccessDenied;
                }
                Err(e) => {
                    warn!(%pid, error = %e, "Failed to run taskkill");
                    return TerminationResult::Failed(format!("taskkill failed: {e}"));
                }
            }
        }

        if Self::process_exists(pid) {
            TerminationResult::Failed(format!("taskkill could not terminate pid {pid}"))
        } else {
            TerminationResult::ProcessNotFound
        }
    }
}

impl ProcessManager for WindowsProcessManager {
    fn platform_name(&self) -> &'static str {
        "Windows"
    }
}
