use async_trait::async_trait;
use std::fmt;
use std::num::ParseIntError;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::io::AsyncRead;

use crate::error::ProcessError;

/// Operating system process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(u32);

impl ProcessId {
    pub fn new(pid: u32) -> Self {
        Self(pid)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for ProcessId {
    fn from(pid: u32) -> Self {
        Self(pid)
    }
}

impl FromStr for ProcessId {
    type Err = ParseIntError;

    /// Parses a pid record; surrounding whitespace is ignored
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u32>().map(Self)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a process after it has exited
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessStatus {
    /// Exit code, `None` when terminated by a signal
    Exited(Option<i32>),
    /// The exit status could not be collected
    Failed(String),
}

/// Result of a process termination operation
#[derive(Debug, Clone, PartialEq)]
pub enum TerminationResult {
    /// Signal delivered
    Success,
    /// Process was not found (already exited)
    ProcessNotFound,
    /// Insufficient privileges to signal the process
    AccessDenied,
    /// Operation failed with specific error message
    Failed(String),
}

/// Boxed standard stream of a child process
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// Trait representing a handle to a running process
#[async_trait]
pub trait ProcessHandle: Send {
    /// Get the process ID (None if process has exited)
    fn get_pid(&self) -> Option<ProcessId>;

    /// Get the program that started this process
    fn get_command(&self) -> &Path;

    /// Get the arguments passed to this process
    fn get_args(&self) -> &[String];

    /// Take ownership of the piped stdout. Returns `None` on the second call.
    fn take_stdout(&mut self) -> Option<OutputStream>;

    /// Take ownership of the piped stderr. Returns `None` on the second call.
    fn take_stderr(&mut self) -> Option<OutputStream>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ProcessStatus, ProcessError>;
}

/// Launching child processes
#[async_trait]
pub trait ProcessLifecycle: Send + Sync {
    /// Spawn `program` with `args`, stdin closed and stdout/stderr piped
    async fn spawn_process(
        &self,
        program: &Path,
        args: &[String],
    ) -> Result<Box<dyn ProcessHandle>, ProcessError>;
}

/// Signalling processes by pid, including ones this session did not start
#[async_trait]
pub trait ProcessTermination: Send + Sync {
    /// Ask a process to exit (SIGTERM on Unix)
    async fn terminate_gracefully(&self, pid: ProcessId) -> TerminationResult;
}

/// Combined lifecycle and termination for one platform
pub trait ProcessManager: ProcessLifecycle + ProcessTermination {
    /// Platform name for logging and debugging
    fn platform_name(&self) -> &'static str;
}

/// Notification hook arguments handed to the daemon
pub const NOTIFY_ARGS: [&str; 3] = [
    r#"-alertnotify=echo "ALERT:%s""#,
    r#"-walletnotify=echo "WALLET:%s""#,
    r#"-blocknotify=echo "BLOCK:%s""#,
];

/// Command line of the daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonArgs {
    pub conf: PathBuf,
    pub datadir: PathBuf,
}

impl DaemonArgs {
    pub fn new(conf: impl Into<PathBuf>, datadir: impl Into<PathBuf>) -> Self {
        Self {
            conf: conf.into(),
            datadir: datadir.into(),
        }
    }

    /// Argument vector; values are passed through literally without quoting
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            format!("-conf={}", self.conf.display()),
            format!("-datadir={}", self.datadir.display()),
        ];
        args.extend(NOTIFY_ARGS.iter().map(|arg| arg.to_string()));
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_parsing() {
        assert_eq!("4242\n".parse::<ProcessId>().unwrap(), ProcessId::new(4242));
        assert_eq!(" 17 ".parse::<ProcessId>().unwrap().as_u32(), 17);
        assert!("".parse::<ProcessId>().is_err());
        assert!("abc".parse::<ProcessId>().is_err());
        assert!("-3".parse::<ProcessId>().is_err());
        assert_eq!(ProcessId::from(9).to_string(), "9");
    }

    #[test]
    fn test_daemon_args() {
        let args = DaemonArgs::new("/data/daemon/reddcoin.conf", "/data/daemon").to_args();
        assert_eq!(
            args,
            vec![
                "-conf=/data/daemon/reddcoin.conf".to_string(),
                "-datadir=/data/daemon".to_string(),
                "-alertnotify=echo \"ALERT:%s\"".to_string(),
                "-walletnotify=echo \"WALLET:%s\"".to_string(),
                "-blocknotify=echo \"BLOCK:%s\"".to_string(),
            ]
        );
    }

    #[test]
    fn test_paths_with_spaces_are_not_quoted() {
        let args = DaemonArgs::new("/my data/reddcoin.conf", "/my data").to_args();
        assert_eq!(args[0], "-conf=/my data/reddcoin.conf");
        assert_eq!(args[1], "-datadir=/my data");
    }
}
