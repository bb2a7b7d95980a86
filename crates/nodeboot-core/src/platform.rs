//! Typed lookup from host platform and architecture to the bundled daemon binary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::BootstrapError;

/// Operating systems with a bundled daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    Windows,
    MacOs,
}

impl Platform {
    /// Accepts both Rust (`linux`, `windows`, `macos`) and Node-style (`win32`, `darwin`) names
    pub fn from_identifier(os: &str) -> Option<Self> {
        match os {
            "linux" => Some(Platform::Linux),
            "windows" | "win32" => Some(Platform::Windows),
            "macos" | "darwin" => Some(Platform::MacOs),
            _ => None,
        }
    }

    pub fn is_windows(self) -> bool {
        matches!(self, Platform::Windows)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X32,
    X64,
}

impl Arch {
    pub fn from_identifier(arch: &str) -> Option<Self> {
        match arch {
            "x32" | "ia32" | "x86" => Some(Arch::X32),
            "x64" | "x86_64" => Some(Arch::X64),
            _ => None,
        }
    }
}

/// Raw OS and architecture identifiers of the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostTarget {
    os: String,
    arch: String,
}

impl HostTarget {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    pub fn current() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn platform(&self) -> Option<Platform> {
        Platform::from_identifier(&self.os)
    }

    pub fn arch(&self) -> Option<Arch> {
        Arch::from_identifier(&self.arch)
    }

    pub fn is_windows(&self) -> bool {
        self.platform().is_some_and(Platform::is_windows)
    }
}

impl fmt::Display for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.os, self.arch)
    }
}

/// Binaries for one platform: per-architecture overrides plus a fallback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformBinaries {
    by_arch: HashMap<Arch, PathBuf>,
    default: PathBuf,
}

impl PlatformBinaries {
    pub fn new(default: impl Into<PathBuf>) -> Self {
        Self {
            by_arch: HashMap::new(),
            default: default.into(),
        }
    }

    pub fn with_arch(mut self, arch: Arch, path: impl Into<PathBuf>) -> Self {
        self.by_arch.insert(arch, path.into());
        self
    }

    pub fn path_for(&self, arch: Option<Arch>) -> &Path {
        arch.and_then(|arch| self.by_arch.get(&arch))
            .unwrap_or(&self.default)
    }
}

/// Immutable platform × architecture table of daemon binaries.
///
/// Paths are relative to the binaries root of the installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonBinaryMap {
    platforms: HashMap<Platform, PlatformBinaries>,
}

impl Default for DaemonBinaryMap {
    fn default() -> Self {
        Self::reddcoind()
    }
}

impl DaemonBinaryMap {
    pub fn empty() -> Self {
        Self {
            platforms: HashMap::new(),
        }
    }

    /// The bundled reddcoind builds
    pub fn reddcoind() -> Self {
        Self::empty()
            .with_platform(
                Platform::Linux,
                PlatformBinaries::new("reddcoind-linux-32")
                    .with_arch(Arch::X32, "reddcoind-linux-32")
                    .with_arch(Arch::X64, "reddcoind-linux-64"),
            )
            .with_platform(
                Platform::Windows,
                PlatformBinaries::new("reddcoind-win-32.exe")
                    .with_arch(Arch::X32, "reddcoind-win-32.exe")
                    .with_arch(Arch::X64, "reddcoind-win-32.exe"),
            )
            .with_platform(
                Platform::MacOs,
                PlatformBinaries::new("reddcoind-mac-64").with_arch(Arch::X64, "reddcoind-mac-64"),
            )
    }

    pub fn with_platform(mut self, platform: Platform, binaries: PlatformBinaries) -> Self {
        self.platforms.insert(platform, binaries);
        self
    }

    /// True iff the host platform has an entry
    pub fn has_valid_daemon(&self, host: &HostTarget) -> bool {
        host.platform()
            .is_some_and(|platform| self.platforms.contains_key(&platform))
    }

    /// Architecture-specific path, else the platform default
    pub fn resolve_path(&self, host: &HostTarget) -> Result<&Path, BootstrapError> {
        host.platform()
            .and_then(|platform| self.platforms.get(&platform))
            .map(|binaries| binaries.path_for(host.arch()))
            .ok_or_else(|| BootstrapError::PlatformUnsupported {
                platform: host.to_string(),
            })
    }
}
