mod base;
mod implementations;
mod types;

pub use base::{resolve_tool, ProcessController};
#[cfg(unix)]
pub use implementations::UnixProcessControl;
#[cfg(windows)]
pub use implementations::WindowsProcessControl;
#[cfg(test)]
pub use implementations::MockProcessControl;
pub use implementations::platform_controller;
pub use types::{BoxStream, CommandSpec, ProcId, Spawned};
