#[cfg(test)]
mod mock;
#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

use std::sync::Arc;

#[cfg(test)]
pub use mock::MockProcessControl;
#[cfg(unix)]
pub use unix::UnixProcessControl;
#[cfg(windows)]
pub use windows::WindowsProcessControl;

use super::ProcessController;

/// Controller for the OS family we were built for.
pub fn platform_controller() -> Arc<dyn ProcessController> {
    #[cfg(unix)]
    {
        Arc::new(UnixProcessControl::new())
    }
    #[cfg(windows)]
    {
        Arc::new(WindowsProcessControl::new())
    }
}
