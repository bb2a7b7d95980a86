#[cfg(windows)]
mod windows_process_manager;

#[cfg(windows)]
pub use windows_process_manager::{WindowsProcessHandle, WindowsProcessManager};

#[cfg(windows)]
pub struct WindowsProcessManagerFactory;

#[cfg(windows)]
impl WindowsProcessManagerFactory {
    pub fn create_process_manager() -> WindowsProcessManager {
        WindowsProcessManager::new()
    }

    pub fn platform_name() -> &'static str {
        "Windows"
    }
}
