//! Daemon configuration file: first-run generation and `key=value` parsing.

use rand::RngCore;
use rand::rngs::OsRng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{Instrument, Span, debug, info, warn};

use crate::config::BootstrapSettings;
use crate::error::ConfigError;

const SECRET_BYTES: usize = 32;

/// What [`ConfigManager::ensure_config`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigOutcome {
    Created,
    Existing,
}

/// Quality of the randomness behind a generated credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretStrength {
    /// Operating system CSPRNG
    Secure,
    /// Thread-local PRNG fallback, used only when the OS source fails
    Weak,
}

/// Hex-encoded random credential of 64 characters
pub fn generate_secret() -> (String, SecretStrength) {
    let mut bytes = [0u8; SECRET_BYTES];
    match OsRng.try_fill_bytes(&mut bytes) {
        Ok(()) => (hex::encode(bytes), SecretStrength::Secure),
        Err(_) => {
            rand::thread_rng().fill_bytes(&mut bytes);
            (hex::encode(bytes), SecretStrength::Weak)
        }
    }
}

/// Parsed daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonConfig(BTreeMap<String, String>);

impl DaemonConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for DaemonConfig {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Parse `key=value` lines.
///
/// Only lines splitting into exactly two parts on `=` are kept; anything else,
/// including values that themselves contain `=`, is dropped.
pub fn parse_config_str(text: &str) -> DaemonConfig {
    text.split('\n')
        .filter_map(|line| {
            let mut parts = line.split('=');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(value), None) => {
                    Some((key.trim().to_string(), value.trim().to_string()))
                }
                _ => None,
            }
        })
        .collect()
}

/// Owns the daemon directory and its configuration file
#[derive(Debug, Clone)]
pub struct ConfigManager {
    daemon_dir: PathBuf,
    config_path: PathBuf,
    template_path: PathBuf,
    placeholder: String,
    span: Span,
}

impl ConfigManager {
    pub fn new(settings: &BootstrapSettings, span: Span) -> Self {
        Self {
            daemon_dir: settings.daemon_dir(),
            config_path: settings.config_path(),
            template_path: settings.template_path(),
            placeholder: settings.password_placeholder.clone(),
            span,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn daemon_dir(&self) -> &Path {
        &self.daemon_dir
    }

    /// Create the daemon directory and, on first run, the config file from the
    /// bundled template. An existing config file is never touched.
    pub async fn ensure_config(&self) -> Result<ConfigOutcome, ConfigError> {
        async {
            debug!(path = %self.daemon_dir.display(), "Checking daemon directory");
            if !fs::try_exists(&self.daemon_dir).await.unwrap_or(false) {
                fs::create_dir_all(&self.daemon_dir)
                    .await
                    .map_err(|source| ConfigError::CreateDir {
                        path: self.daemon_dir.clone(),
                        source,
                    })?;
                info!(path = %self.daemon_dir.display(), "Created daemon directory");
            }

            if fs::try_exists(&self.config_path).await.unwrap_or(false) {
                debug!(path = %self.config_path.display(), "Daemon configuration already present");
                return Ok(ConfigOutcome::Existing);
            }

            let template = fs::read_to_string(&self.template_path)
                .await
                .map_err(|source| ConfigError::TemplateMissing {
                    path: self.template_path.clone(),
                    source,
                })?;

            debug!("Generating random password for daemon rpc");
            let (secret, strength) = generate_secret();
            if strength == SecretStrength::Weak {
                warn!("Secure random source unavailable, generated rpc password with a weaker generator");
            }
            let contents = template.replacen(&self.placeholder, &secret, 1);

            fs::write(&self.config_path, contents)
                .await
                .map_err(|source| ConfigError::Write {
                    path: self.config_path.clone(),
                    source,
                })?;
            info!(path = %self.config_path.display(), "Copied default daemon configuration");

            Ok(ConfigOutcome::Created)
        }
        .instrument(self.span.clone())
        .await
    }

    pub async fn parse_config(&self) -> Result<DaemonConfig, ConfigError> {
        let text = fs::read_to_string(&self.config_path)
            .instrument(self.span.clone())
            .await
            .map_err(|source| ConfigError::Read {
                path: self.config_path.clone(),
                source,
            })?;
        let config = parse_config_str(&text);
        debug!(parent: &self.span, entries = config.len(), "Parsed daemon configuration");
        Ok(config)
    }
}
