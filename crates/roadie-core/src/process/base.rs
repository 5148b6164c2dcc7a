use std::time::Duration;

use crate::process::types::{CommandSpec, ProcId, Spawned};

/// Platform seam for everything that touches the OS process table.
/// Callers never branch on platform; they go through this trait.
#[async_trait::async_trait]
pub trait ProcessController: Send + Sync {
    /// Spawn a new supervised process, detached from our own process
    /// group/job so it outlives the supervisor.
    async fn spawn(&self, spec: CommandSpec) -> crate::error::Result<Spawned>;
    /// Spawn a fire-and-forget command (container bring-up). No handle is
    /// kept beyond reaping; output is discarded.
    async fn spawn_detached(&self, spec: CommandSpec) -> crate::error::Result<Option<u32>>;
    /// Gracefully signal a held process.
    async fn shutdown(&self, id: ProcId) -> crate::error::Result<()>;
    /// Wait for a held process to exit, up to `d`. `None` means timeout.
    async fn wait(&self, id: ProcId, d: Duration) -> crate::error::Result<Option<i32>>;
    /// Forcefully kill a held process.
    async fn kill(&self, id: ProcId) -> crate::error::Result<()>;

    /// Run a short probe command and return its stdout. `None` on any
    /// failure or timeout; probes are best-effort.
    async fn run_probe(&self, cmd: &[String], timeout: Duration) -> Option<String>;

    /// Pid of the process listening on a local TCP port. Must answer
    /// within ~2s or return `None`; the sub-timeout is independent of
    /// caller policy.
    async fn find_pid_by_port(&self, port: u16) -> Option<u32>;
    /// Liveness probe by pid. Permission-denied counts as alive: the
    /// signal reached a real process we just cannot touch.
    async fn is_alive(&self, pid: u32) -> bool;
    /// Best-effort command line of an arbitrary pid.
    async fn command_line(&self, pid: u32) -> Option<String>;
    /// Best-effort start time of an arbitrary pid, as a stable string.
    async fn start_time(&self, pid: u32) -> Option<String>;
    /// Terminate the process tree rooted at `pid`. Already-gone is
    /// success, not failure.
    async fn kill_tree(&self, pid: u32, force: bool) -> bool;
    /// Last-resort strategy for listeners that respawn through a
    /// supervising parent: walk the parent chain of the current port
    /// owner and kill a recognized autoreload root. `tried` lists pids
    /// already killed in the ordinary rounds.
    async fn kill_stubborn_listener(&self, port: u16, tried: &[u32]) -> bool;
}

/// Resolve a required external tool against PATH. `a|b` lists
/// alternatives, first hit wins.
pub fn resolve_tool(spec: &str) -> Result<std::path::PathBuf, String> {
    let names: Vec<&str> = spec.split('|').map(str::trim).filter(|s| !s.is_empty()).collect();
    for name in &names {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }
    Err(match names.as_slice() {
        [one] => format!("required tool `{one}` was not found on PATH"),
        many => format!("none of the required tools ({}) were found on PATH", many.join(", ")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_tool_reports_all_alternatives() {
        let err = resolve_tool("definitely-not-a-tool|also-not-a-tool").unwrap_err();
        assert!(err.contains("definitely-not-a-tool"));
        assert!(err.contains("also-not-a-tool"));
    }

    #[test]
    fn resolve_tool_finds_common_binary() {
        // `sh` exists on every unix box our tests run on.
        #[cfg(unix)]
        assert!(resolve_tool("sh").is_ok());
    }
}
