use nodeboot_core::ProcessManager;
use std::sync::Arc;

/// Platform-independent factory that selects the appropriate implementation at compile time
pub struct PlatformProcessManagerFactory;

impl PlatformProcessManagerFactory {
    pub fn create_process_manager() -> Arc<dyn ProcessManager> {
        #[cfg(unix)]
        return Arc::new(nodeboot_unix::UnixProcessManagerFactory::create_process_manager());

        #[cfg(windows)]
        return Arc::new(nodeboot_windows::WindowsProcessManagerFactory::create_process_manager());

        #[cfg(not(any(unix, windows)))]
        compile_error!("Unsupported platform: only Unix and Windows are currently supported");
    }

    pub fn platform_name() -> &'static str {
        #[cfg(unix)]
        return nodeboot_unix::UnixProcessManagerFactory::platform_name();

        #[cfg(windows)]
        return nodeboot_windows::WindowsProcessManagerFactory::platform_name();
    }
}
