mod output;

pub use output::{format_line, strip_ansi, LineBuffer, LogTag};

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use roadie_types::{HealthStatus, ServiceDefinition, ServiceKind, SupervisorConfig};
use tokio::sync::Mutex;

use crate::{
    error::Result,
    log_channel::{LogChannel, LogLimits},
    pid_store::{PidEntry, PidStore},
    process::{resolve_tool, CommandSpec, ProcId, ProcessController, Spawned},
};

/// Mutable per-service state. Owned exclusively by the `ServiceProcess`;
/// the start/stop caller and the health monitor both go through the one
/// lock so every transition is a single read-modify-write.
#[derive(Debug)]
struct ProcState {
    running: bool,
    health: HealthStatus,
    tool_available: bool,
    tool_message: String,
    /// Three provenance slots; started always wins because it is the
    /// most trustworthy. At most one of started/detected is
    /// authoritative at a time.
    started_pid: Option<u32>,
    detected_pid: Option<u32>,
    persisted_pid: Option<u32>,
    /// Last user intent, independent of what is actually observed.
    requested_running: bool,
    /// Running but not spawned (or not stoppable) by this instance.
    externally_managed: bool,
    last_error_line: String,
    log: LogChannel,
    log_offset: u64,
    proc_id: Option<ProcId>,
    /// Bumped on every fresh start so stale pump tasks from a previous
    /// run cannot touch the new state.
    epoch: u64,
}

impl ProcState {
    fn effective_pid(&self) -> Option<u32> {
        self.started_pid.or(self.detected_pid).or(self.persisted_pid)
    }
}

/// Read-only view handed to the monitor and the front end.
#[derive(Debug, Clone)]
pub struct ServiceSnapshot {
    pub key: String,
    pub title: String,
    pub health: HealthStatus,
    pub running: bool,
    pub requested_running: bool,
    pub externally_managed: bool,
    pub effective_pid: Option<u32>,
    pub tool_available: bool,
    pub tool_message: String,
    pub last_error_line: String,
}

enum StopOutcome {
    Stopped,
    StillRunning,
}

/// One supervised service: its definition, its mutable state and its
/// full lifecycle.
pub struct ServiceProcess {
    def: ServiceDefinition,
    cfg: Arc<SupervisorConfig>,
    ctl: Arc<dyn ProcessController>,
    store: Arc<PidStore>,
    state: Mutex<ProcState>,
}

impl ServiceProcess {
    pub fn new(
        def: ServiceDefinition,
        cfg: Arc<SupervisorConfig>,
        ctl: Arc<dyn ProcessController>,
        store: Arc<PidStore>,
    ) -> Self {
        let limits = LogLimits {
            max_lines: cfg.log_max_lines,
            max_chars: cfg.log_max_chars,
            max_line_len: cfg.log_max_line_len,
            rotate_bytes: cfg.log_rotate_bytes,
        };
        let log = LogChannel::new(&cfg.log_dir, &def.key, limits);
        Self {
            state: Mutex::new(ProcState {
                running: false,
                health: HealthStatus::Stopped,
                tool_available: true,
                tool_message: String::new(),
                started_pid: None,
                detected_pid: None,
                persisted_pid: None,
                requested_running: false,
                externally_managed: false,
                last_error_line: String::new(),
                log,
                log_offset: 0,
                proc_id: None,
                epoch: 0,
            }),
            def,
            cfg,
            ctl,
            store,
        }
    }

    pub fn definition(&self) -> &ServiceDefinition {
        &self.def
    }

    pub async fn snapshot(&self) -> ServiceSnapshot {
        let st = self.state.lock().await;
        ServiceSnapshot {
            key: self.def.key.clone(),
            title: self.def.title.clone(),
            health: st.health,
            running: st.running,
            requested_running: st.requested_running,
            externally_managed: st.externally_managed,
            effective_pid: st.effective_pid(),
            tool_available: st.tool_available,
            tool_message: st.tool_message.clone(),
            last_error_line: st.last_error_line.clone(),
        }
    }

    pub async fn effective_pid(&self) -> Option<u32> {
        self.state.lock().await.effective_pid()
    }

    /// Take over a pid that survived a supervisor restart. The log tail
    /// starts at the current end of file; history is never replayed.
    pub async fn adopt_persisted(&self, entry: &PidEntry) {
        let mut st = self.state.lock().await;
        st.persisted_pid = Some(entry.pid);
        st.running = true;
        st.requested_running = true;
        st.externally_managed = true;
        st.health = HealthStatus::Starting;
        st.log_offset = st.log.attach_offset();
        tracing::info!(key = %self.def.key, pid = entry.pid, "re-attached to persisted process");
    }

    /// Record a pid discovered through its port. Ignored while a started
    /// pid is authoritative.
    pub async fn note_detected_pid(&self, pid: u32) {
        let mut st = self.state.lock().await;
        if st.started_pid.is_some() {
            return;
        }
        st.detected_pid = Some(pid);
        st.running = true;
        st.externally_managed = true;
        tracing::debug!(key = %self.def.key, pid, "detected external process by port");
    }

    /// Monitor write-back.
    pub async fn record_health(&self, status: HealthStatus) {
        let mut st = self.state.lock().await;
        st.health = status;
        match status {
            HealthStatus::Healthy => {
                st.running = true;
            }
            HealthStatus::Stopped => {
                st.running = false;
                if st.started_pid.take().is_some()
                    || st.detected_pid.take().is_some()
                    || st.persisted_pid.take().is_some()
                {
                    self.store.clear(&self.def.key);
                }
                st.proc_id = None;
            }
            HealthStatus::Starting | HealthStatus::Unhealthy => {}
        }
    }

    /// New complete log lines since the last call (or since attach).
    pub async fn tail_new_lines(&self) -> Vec<String> {
        let mut st = self.state.lock().await;
        let (lines, offset) = st.log.tail_from(st.log_offset);
        st.log_offset = offset;
        lines
    }

    pub async fn buffered_log(&self) -> Vec<String> {
        let st = self.state.lock().await;
        st.log.lines().map(str::to_owned).collect()
    }

    /// Start the service. Idempotent: already running is success, a
    /// missing required tool is a refusal (`Ok(false)`), only a spawn
    /// failure is an error.
    pub async fn start(self: &Arc<Self>) -> Result<bool> {
        let mut st = self.state.lock().await;
        if st.running {
            return Ok(true);
        }

        if let Some(tool) = &self.def.tool {
            match resolve_tool(tool) {
                Ok(_) => {
                    st.tool_available = true;
                    st.tool_message.clear();
                }
                Err(message) => {
                    tracing::warn!(key = %self.def.key, %message, "start blocked");
                    st.tool_available = false;
                    st.tool_message = message;
                    return Ok(false);
                }
            }
        }

        st.requested_running = true;
        st.started_pid = None;
        st.detected_pid = None;
        st.externally_managed = false;
        st.epoch += 1;
        let epoch = st.epoch;

        let spec = CommandSpec {
            name: self.def.key.clone(),
            cmd: self.def.cmd.clone(),
            cwd: self.def.cwd.clone(),
            env: self.def.env.clone(),
        };

        if matches!(self.def.kind, ServiceKind::ContainerGroup { .. }) {
            // Bring-up only; liveness is entirely the monitor's business.
            self.ctl.spawn_detached(spec).await?;
            st.running = true;
            st.health = HealthStatus::Starting;
            let line = format_line(LogTag::Out, "container group bring-up issued");
            st.log.append(&line);
            st.log.persist(&line);
            return Ok(true);
        }

        let spawned = match self.ctl.spawn(spec.clone()).await {
            Ok(spawned) => spawned,
            Err(err) => {
                let line = format_line(LogTag::Err, &format!("failed to start: {err}"));
                st.last_error_line = line.clone();
                st.log.append(&line);
                st.log.persist(&line);
                st.running = false;
                st.health = HealthStatus::Stopped;
                return Err(err);
            }
        };

        st.started_pid = spawned.pid;
        st.proc_id = Some(spawned.id);
        st.running = true;
        st.health = HealthStatus::Starting;
        st.log_offset = st.log.attach_offset();

        // Persist before anything else can go wrong: a supervisor crash
        // right after this line must still find the pid on next launch.
        if let Some(pid) = spawned.pid {
            let start_time = self.ctl.start_time(pid).await;
            self.store.save(
                &self.def.key,
                PidEntry {
                    pid,
                    port: self.def.port,
                    cmdline: Some(spec.display_line()),
                    start_time,
                },
            );
        }
        drop(st);

        self.spawn_output_pump(spawned, epoch);
        tracing::info!(key = %self.def.key, "service started");
        Ok(true)
    }

    /// Stop the service. Idempotent; `graceful` asks politely first and
    /// force-kills only after the configured wait.
    pub async fn stop(&self, graceful: bool) -> Result<()> {
        let (proc_id, known_pid, epoch) = {
            let mut st = self.state.lock().await;
            st.requested_running = false;
            if !st.running && st.effective_pid().is_none() {
                return Ok(());
            }
            (st.proc_id, st.effective_pid(), st.epoch)
        };

        if let Some(id) = proc_id {
            if graceful {
                let _ = self.ctl.shutdown(id).await;
                let exited = self.ctl.wait(id, self.cfg.stop_wait).await.ok().flatten();
                if exited.is_none() {
                    tracing::debug!(key = %self.def.key, "graceful stop timed out, killing");
                    let _ = self.ctl.kill(id).await;
                    let _ = self.ctl.wait(id, Duration::from_secs(2)).await;
                }
            } else {
                let _ = self.ctl.kill(id).await;
                let _ = self.ctl.wait(id, Duration::from_secs(2)).await;
            }
            self.mark_stopped(epoch).await;
            return Ok(());
        }

        // No live handle: kill by pid, falling back to a port lookup.
        let target = match known_pid {
            Some(pid) => Some(pid),
            None => match self.def.port {
                Some(port) => self.ctl.find_pid_by_port(port).await,
                None => None,
            },
        };
        let Some(target) = target else {
            self.mark_stopped(epoch).await;
            return Ok(());
        };

        match self.stop_detected(target, graceful).await {
            StopOutcome::Stopped => self.mark_stopped(epoch).await,
            StopOutcome::StillRunning => {
                let mut st = self.state.lock().await;
                st.externally_managed = true;
                st.health = HealthStatus::Unhealthy;
                tracing::warn!(
                    key = %self.def.key,
                    "process refuses to die; marking externally managed"
                );
            }
        }
        Ok(())
    }

    /// Kill a process we do not hold, chasing respawned children that
    /// reclaim the port, with bounded rounds and a late escalation.
    async fn stop_detected(&self, first: u32, graceful: bool) -> StopOutcome {
        let mut tried: Vec<u32> = Vec::new();
        let mut target = Some(first);

        for round in 0..self.cfg.stop_rounds {
            if let Some(pid) = target.take() {
                let force = !graceful || round > 0;
                self.ctl.kill_tree(pid, force).await;
                tried.push(pid);
            }
            tokio::time::sleep(self.cfg.stop_reprobe_delay).await;

            match self.def.port {
                Some(port) => match self.ctl.find_pid_by_port(port).await {
                    None => return StopOutcome::Stopped,
                    Some(owner) => {
                        if !tried.contains(&owner) {
                            tracing::debug!(
                                key = %self.def.key,
                                old = tried.last(),
                                new = owner,
                                "port reclaimed by a respawned process"
                            );
                        }
                        if round + 1 >= self.cfg.escalate_after {
                            self.ctl.kill_stubborn_listener(port, &tried).await;
                        }
                        target = Some(owner);
                    }
                },
                None => {
                    // Without a port the last kill target is all we have.
                    let last = *tried.last().unwrap_or(&first);
                    if !self.ctl.is_alive(last).await {
                        return StopOutcome::Stopped;
                    }
                    target = Some(last);
                }
            }
        }
        StopOutcome::StillRunning
    }

    async fn mark_stopped(&self, epoch: u64) {
        let mut st = self.state.lock().await;
        if st.epoch != epoch {
            return;
        }
        st.running = false;
        st.health = HealthStatus::Stopped;
        st.started_pid = None;
        st.detected_pid = None;
        st.persisted_pid = None;
        st.proc_id = None;
        st.externally_managed = false;
        self.store.clear(&self.def.key);
        tracing::info!(key = %self.def.key, "service stopped");
    }

    fn spawn_output_pump(self: &Arc<Self>, spawned: Spawned, epoch: u64) {
        let this = Arc::clone(self);
        let id = spawned.id;
        let mut stdout = spawned.stdout;
        let mut stderr = spawned.stderr;

        tokio::spawn(async move {
            let (tx, mut rx) = tokio::sync::mpsc::channel::<(LogTag, String)>(64);

            let out_task = {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut buf = LineBuffer::default();
                    while let Some(chunk) = stdout.next().await {
                        for line in buf.push(&chunk) {
                            if tx.send((LogTag::Out, line)).await.is_err() {
                                return;
                            }
                        }
                    }
                    if let Some(rest) = buf.flush() {
                        let _ = tx.send((LogTag::Out, rest)).await;
                    }
                })
            };
            let err_task = {
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut buf = LineBuffer::default();
                    while let Some(chunk) = stderr.next().await {
                        for line in buf.push(&chunk) {
                            if tx.send((LogTag::Err, line)).await.is_err() {
                                return;
                            }
                        }
                    }
                    if let Some(rest) = buf.flush() {
                        let _ = tx.send((LogTag::Err, rest)).await;
                    }
                })
            };
            drop(tx);

            while let Some((tag, raw)) = rx.recv().await {
                let line = format_line(tag, &strip_ansi(&raw));
                let mut st = this.state.lock().await;
                if st.epoch != epoch {
                    return;
                }
                if tag == LogTag::Err {
                    st.last_error_line = line.clone();
                }
                st.log.append(&line);
                st.log.persist(&line);
            }
            let _ = out_task.await;
            let _ = err_task.await;

            // Streams closing usually means the process exited, but a
            // child may also just close its stdio. Only a confirmed exit
            // transitions the state; otherwise the monitor keeps watch.
            match this.ctl.wait(id, Duration::from_secs(2)).await {
                Ok(Some(code)) => this.handle_exit(epoch, code).await,
                Ok(None) => {}
                // Handle already reaped by a concurrent stop.
                Err(_) => {}
            }
        });
    }

    async fn handle_exit(&self, epoch: u64, code: i32) {
        let mut st = self.state.lock().await;
        if st.epoch != epoch || !st.running {
            // A newer start owns the state, or stop() already cleaned up.
            return;
        }
        if code != 0 {
            let message = if code < 0 {
                "process terminated by signal".to_owned()
            } else {
                format!("process exited unexpectedly with code {code}")
            };
            let line = format_line(LogTag::Err, &message);
            st.last_error_line = line.clone();
            st.log.append(&line);
            st.log.persist(&line);
            tracing::warn!(key = %self.def.key, code, "abnormal exit");
        }
        st.running = false;
        st.health = HealthStatus::Stopped;
        st.started_pid = None;
        st.proc_id = None;
        self.store.clear(&self.def.key);
    }
}
