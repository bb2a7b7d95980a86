//! Local daemon bootstrapper.
//!
//! [`BootstrapController`] locates the bundled node binary for this platform,
//! prepares its configuration, replaces any daemon left over from a previous
//! session, spawns it and waits until it answers RPC probes. Daemon output is
//! relayed as [`DaemonEvent`]s on an [`EventBus`].

mod controller;
mod factory;
mod supervisor;
mod telemetry;

pub use controller::BootstrapController;
pub use factory::PlatformProcessManagerFactory;
pub use supervisor::{KillOutcome, ProcessSupervisor, SpawnedDaemon};
pub use telemetry::{LogFormat, init_tracing, init_tracing_with};

// Re-export core functionality
pub use nodeboot_core::*;
