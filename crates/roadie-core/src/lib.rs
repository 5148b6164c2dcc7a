mod error;
mod log_channel;
mod monitor;
mod pid_store;
mod process;
mod service;
mod supervisor;

pub use error::{Error, Result};
pub use log_channel::{LogChannel, LogLimits};
pub use pid_store::{PidEntry, PidStore, Verification};
pub use process::{
    platform_controller, resolve_tool, CommandSpec, ProcId, ProcessController, Spawned,
};
pub use service::{ServiceProcess, ServiceSnapshot};
pub use supervisor::Supervisor;

#[cfg(unix)]
pub use process::UnixProcessControl;
#[cfg(windows)]
pub use process::WindowsProcessControl;
