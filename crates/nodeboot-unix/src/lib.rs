#[cfg(unix)]
mod unix_process_manager;

#[cfg(unix)]
pub use unix_process_manager::{UnixProcessHandle, UnixProcessManager};

#[cfg(unix)]
pub struct UnixProcessManagerFactory;

#[cfg(unix)]
impl UnixProcessManagerFactory {
    pub fn create_process_manager() -> UnixProcessManager {
        UnixProcessManager::new()
    }

    pub fn platform_name() -> &'static str {
        "Unix"
    }
}
