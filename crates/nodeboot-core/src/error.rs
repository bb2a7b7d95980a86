use std::path::PathBuf;
use thiserror::Error;

use crate::outcome::ResultCode;
use crate::process::ProcessId;

/// Operator-facing message for a platform missing from the binary table
pub const UNSUPPORTED_PLATFORM_MESSAGE: &str =
    "This operating system does not support running the Reddcoin daemon.";

/// Operator-facing message for any failure to launch the daemon binary
pub const SPAWN_FAILURE_MESSAGE: &str =
    "We cannot start the daemon, please check no other wallets are running.";

/// Operator-facing message for an unreadable configuration file
pub const CONFIG_PARSE_MESSAGE: &str =
    "An error occurred whilst trying to parse the daemon configuration file.";

/// Errors that abort the bootstrap pipeline
#[derive(Error, Debug)]
pub enum BootstrapError {
    #[error("no daemon binary is registered for platform '{platform}'")]
    PlatformUnsupported { platform: String },

    #[error("daemon binary for {platform} not found at '{path}'")]
    BinaryMissing { platform: String, path: PathBuf },

    #[error("configuration initialisation failed: {0}")]
    ConfigInit(#[source] ConfigError),

    #[error("configuration parsing failed: {0}")]
    ConfigParse(#[source] ConfigError),

    #[error("failed to spawn daemon: {0}")]
    Spawn(#[from] ProcessError),

    #[error("daemon reported an error: {0}")]
    DaemonRuntime(String),

    #[error("daemon did not become ready after {attempts} probes")]
    NotReady { attempts: u32 },

    #[error("bootstrap cancelled before the daemon became ready")]
    Cancelled,
}

impl BootstrapError {
    /// Stable numeric code reported to the application
    pub fn code(&self) -> ResultCode {
        match self {
            BootstrapError::PlatformUnsupported { .. } => ResultCode::UnsupportedPlatform,
            BootstrapError::ConfigInit(_) | BootstrapError::ConfigParse(_) => {
                ResultCode::ConfigInitError
            }
            BootstrapError::BinaryMissing { .. }
            | BootstrapError::Spawn(_)
            | BootstrapError::DaemonRuntime(_)
            | BootstrapError::NotReady { .. }
            | BootstrapError::Cancelled => ResultCode::DaemonUnavailable,
        }
    }

    /// Message shown to the operator. Never contains internal traces.
    pub fn user_message(&self) -> String {
        match self {
            BootstrapError::PlatformUnsupported { .. } => UNSUPPORTED_PLATFORM_MESSAGE.to_string(),
            BootstrapError::BinaryMissing { platform, .. } => {
                format!("Cannot find the daemon for this operating system: {platform}")
            }
            BootstrapError::ConfigInit(error) => error.to_string(),
            BootstrapError::ConfigParse(_) => CONFIG_PARSE_MESSAGE.to_string(),
            BootstrapError::Spawn(_) => SPAWN_FAILURE_MESSAGE.to_string(),
            BootstrapError::DaemonRuntime(message) => message.clone(),
            BootstrapError::NotReady { attempts } => {
                format!("The daemon did not become ready after {attempts} attempts.")
            }
            BootstrapError::Cancelled => "Daemon start-up was cancelled.".to_string(),
        }
    }
}

/// Failures while preparing or reading the daemon configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not create daemon directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("default configuration template '{path}' is missing: {source}")]
    TemplateMissing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write configuration file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read configuration file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from launching or signalling a process
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to spawn process: {0}")]
    SpawnFailed(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("a daemon is already supervised (pid {0})")]
    AlreadyRunning(ProcessId),

    #[error("process handle has no pid; the child exited during start-up")]
    MissingPid,

    #[error("failed to write pid record '{path}': {source}")]
    PidWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Numeric classification of a probe failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcErrorCode {
    /// The daemon is not listening yet
    ConnectionRefused,
    /// Error code reported by the daemon itself
    Numeric(i64),
}

/// Errors from the daemon RPC collaborator
#[derive(Error, Debug)]
pub enum RpcError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("rpc error {code}: {message}")]
    Daemon { code: i64, message: String },

    #[error("rpc transport error: {0}")]
    Transport(String),

    #[error("rpc client has no endpoint configured")]
    NotConfigured,
}

impl RpcError {
    /// The recognisable code carried by this error, if any
    pub fn code(&self) -> Option<RpcErrorCode> {
        match self {
            RpcError::ConnectionRefused(_) => Some(RpcErrorCode::ConnectionRefused),
            RpcError::Daemon { code, .. } => Some(RpcErrorCode::Numeric(*code)),
            RpcError::Transport(_) | RpcError::NotConfigured => None,
        }
    }
}

/// Errors while loading wallet settings from disk
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("could not read settings file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("settings file '{path}' is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid settings: {0}")]
    Invalid(String),
}
