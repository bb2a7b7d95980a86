//! Platform-independent pieces of the local daemon bootstrapper.
//!
//! Platform crates implement the process traits; the `nodeboot` crate wires
//! everything into the bootstrap pipeline.

mod config;
mod daemon_config;
mod error;
mod events;
mod health;
mod notifications;
mod outcome;
mod platform;
mod process;
mod rpc;
mod schedule;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::*;
pub use daemon_config::*;
pub use error::*;
pub use events::*;
pub use health::*;
pub use notifications::*;
pub use outcome::*;
pub use platform::*;
pub use process::*;
pub use rpc::*;
pub use schedule::*;
