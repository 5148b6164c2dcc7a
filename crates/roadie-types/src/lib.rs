use std::{fmt, path::PathBuf, time::Duration};

/// How a service is probed and brought up. Each kind carries only the
/// fields its health check needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceKind {
    /// HTTP backend with a health endpoint.
    Http { health_url: String },
    /// Background worker with no HTTP surface; health is inferred from
    /// process liveness plus reachability of its broker.
    Worker { broker_addr: String },
    /// Container group (compose-style). `cmd` is the detached "bring up"
    /// command; `list_cmd` lists the group's containers for probing.
    ContainerGroup { list_cmd: Vec<String> },
    /// Plain process, health is pid liveness only.
    Plain,
}

/// Immutable description of one supervised service. Built once at startup
/// from the manifest; never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceDefinition {
    pub key: String,
    pub title: String,
    pub cmd: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub kind: ServiceKind,
    /// TCP port the service listens on, when known. Used for pid
    /// detection and for stopping externally started instances.
    pub port: Option<u16>,
    /// Required external tool, `a|b` lists alternatives.
    pub tool: Option<String>,
    /// Consecutive failed probes tolerated before leaving STARTING.
    pub grace_attempts: u32,
    pub deps: Vec<String>,
    /// OpenAPI-style metadata URLs, surfaced to the front end as-is.
    pub api_docs: Vec<String>,
}

impl ServiceDefinition {
    pub fn new(key: impl Into<String>, cmd: Vec<String>) -> Self {
        let key = key.into();
        Self {
            title: key.clone(),
            key,
            cmd,
            cwd: None,
            env: Vec::new(),
            kind: ServiceKind::Plain,
            port: None,
            tool: None,
            grace_attempts: 5,
            deps: Vec::new(),
            api_docs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Stopped,
    Starting,
    Healthy,
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Stopped => "stopped",
            HealthStatus::Starting => "starting",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Pushed outward on every observed status transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub key: String,
    pub status: HealthStatus,
}

/// Explicit supervisor settings. Passed into constructors; there are no
/// ambient globals.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Directory holding the persisted pid file.
    pub state_dir: PathBuf,
    /// Directory holding one console log file per service.
    pub log_dir: PathBuf,

    pub base_interval: Duration,
    pub startup_interval: Duration,
    pub stable_interval: Duration,
    /// How long after a STARTING transition the startup interval applies.
    pub startup_window: Duration,
    /// How long every service must stay healthy before the stable
    /// interval applies.
    pub stable_after: Duration,

    pub http_timeout: Duration,
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,

    /// Graceful-stop wait before force-killing a live handle.
    pub stop_wait: Duration,
    /// Pause between kill and port re-probe in the detected-stop loop.
    pub stop_reprobe_delay: Duration,
    /// Total kill+reprobe rounds before giving up.
    pub stop_rounds: u32,
    /// Round after which the stubborn-listener escalation kicks in.
    pub escalate_after: u32,
    pub restart_delay: Duration,

    pub log_max_lines: usize,
    pub log_max_chars: usize,
    pub log_max_line_len: usize,
    pub log_rotate_bytes: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".roadie"),
            log_dir: PathBuf::from(".roadie/logs"),
            base_interval: Duration::from_secs(5),
            startup_interval: Duration::from_secs(2),
            stable_interval: Duration::from_secs(10),
            startup_window: Duration::from_secs(60),
            stable_after: Duration::from_secs(300),
            http_timeout: Duration::from_millis(1500),
            connect_timeout: Duration::from_secs(1),
            probe_timeout: Duration::from_secs(2),
            stop_wait: Duration::from_secs(5),
            stop_reprobe_delay: Duration::from_millis(300),
            stop_rounds: 10,
            escalate_after: 8,
            restart_delay: Duration::from_secs(1),
            log_max_lines: 400,
            log_max_chars: 64_000,
            log_max_line_len: 2_000,
            log_rotate_bytes: 1_048_576,
        }
    }
}
