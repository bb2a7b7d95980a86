use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::SettingsError;
use crate::platform::DaemonBinaryMap;

/// Sentinel used by wallet settings for "inside the application data directory"
pub const APP_DIRECTORY_SENTINEL: &str = "$APP";

/// Where the daemon keeps its data, configuration and pid record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DaemonDirectory {
    /// `<app_data_dir>/daemon`
    #[default]
    AppData,
    Custom(PathBuf),
}

impl DaemonDirectory {
    /// Interpret the wallet's `localDaemon.directory` value
    pub fn from_setting(value: &str) -> Self {
        if value == APP_DIRECTORY_SENTINEL {
            DaemonDirectory::AppData
        } else {
            DaemonDirectory::Custom(PathBuf::from(value))
        }
    }
}

/// The wallet's `localDaemon` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalDaemonSettings {
    #[serde(default = "default_directory")]
    pub directory: String,

    /// Heartbeat period in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
}

impl Default for LocalDaemonSettings {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            poll_interval: default_poll_interval(),
        }
    }
}

/// Subset of the wallet configuration relevant to the local daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WalletSettings {
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub local_daemon: LocalDaemonSettings,
}

impl WalletSettings {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Settings for one bootstrap session
#[derive(Debug, Clone, PartialEq, Builder)]
#[builder(setter(into, strip_option))]
pub struct BootstrapSettings {
    /// Per-user application data directory
    pub app_data_dir: PathBuf,

    #[builder(default)]
    pub daemon_directory: DaemonDirectory,

    /// Directory holding the bundled binaries and the default config template
    #[builder(default = "PathBuf::from(\"daemons\")")]
    pub binaries_root: PathBuf,

    #[builder(default = "\"reddcoin.conf\".to_string()")]
    pub config_file_name: String,

    #[builder(default = "\"reddwallet.pid\".to_string()")]
    pub pid_file_name: String,

    #[builder(default = "\"reddcoin.default.conf\".to_string()")]
    pub template_file_name: String,

    #[builder(default = "\"$PASSWORD\".to_string()")]
    pub password_placeholder: String,

    #[builder(default = "Duration::from_secs(1)")]
    pub probe_interval: Duration,

    #[builder(default = "Duration::from_secs(60)")]
    pub heartbeat_interval: Duration,

    /// Wait after signalling a stale daemon
    #[builder(default = "Duration::from_millis(500)")]
    pub kill_grace: Duration,

    /// `None` polls until the daemon answers or the bootstrap is cancelled
    #[builder(default)]
    pub probe_attempt_limit: Option<u32>,

    #[builder(default)]
    pub debug: bool,

    #[builder(default)]
    pub binary_map: DaemonBinaryMap,
}

impl BootstrapSettings {
    pub fn builder() -> BootstrapSettingsBuilder {
        BootstrapSettingsBuilder::default()
    }

    /// Builder pre-filled from the wallet configuration
    pub fn from_wallet(
        wallet: &WalletSettings,
        app_data_dir: impl Into<PathBuf>,
    ) -> BootstrapSettingsBuilder {
        let mut builder = Self::builder();
        builder
            .app_data_dir(app_data_dir)
            .daemon_directory(DaemonDirectory::from_setting(
                &wallet.local_daemon.directory,
            ))
            .heartbeat_interval(Duration::from_secs(wallet.local_daemon.poll_interval))
            .debug(wallet.debug);
        builder
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.probe_interval.is_zero() {
            return Err(SettingsError::Invalid(
                "probe_interval must be greater than zero".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(SettingsError::Invalid(
                "heartbeat_interval must be greater than zero".to_string(),
            ));
        }
        if self.probe_attempt_limit == Some(0) {
            return Err(SettingsError::Invalid(
                "probe_attempt_limit must allow at least one probe".to_string(),
            ));
        }
        Ok(())
    }

    pub fn daemon_dir(&self) -> PathBuf {
        match &self.daemon_directory {
            DaemonDirectory::AppData => self.app_data_dir.join("daemon"),
            DaemonDirectory::Custom(path) => path.clone(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.daemon_dir().join(&self.config_file_name)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.daemon_dir().join(&self.pid_file_name)
    }

    pub fn template_path(&self) -> PathBuf {
        self.binaries_root.join(&self.template_file_name)
    }
}

fn default_directory() -> String {
    APP_DIRECTORY_SENTINEL.to_string()
}
fn default_poll_interval() -> u64 {
    60
}
