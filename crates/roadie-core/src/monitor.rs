use std::{collections::HashMap, sync::Arc, time::Duration};

use roadie_types::{HealthStatus, ServiceKind, StatusEvent, SupervisorConfig};
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    time::{sleep, timeout, Instant},
};

use crate::{
    process::ProcessController,
    service::{ServiceProcess, ServiceSnapshot},
};

/// Per-service probe bookkeeping. Lives inside the monitor loop, never
/// shared.
#[derive(Debug)]
struct HealthRecord {
    fails: u32,
    last: HealthStatus,
    ever_healthy: bool,
    healthy_since: Option<Instant>,
    last_starting: Option<Instant>,
    warned_external: bool,
}

impl Default for HealthRecord {
    fn default() -> Self {
        Self {
            fails: 0,
            last: HealthStatus::Stopped,
            ever_healthy: false,
            healthy_since: None,
            last_starting: None,
            warned_external: false,
        }
    }
}

/// What one HTTP probe attempt actually saw. The distinction matters
/// past the failure grace: a server answering with errors is unhealthy,
/// a server that is not there at all is stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HttpProbe {
    Up,
    HttpError(u16),
    Unreachable,
}

/// Single background task probing every service on an adaptive interval
/// and writing observed health back through the services themselves.
pub struct HealthMonitor {
    cfg: Arc<SupervisorConfig>,
    ctl: Arc<dyn ProcessController>,
    services: Vec<Arc<ServiceProcess>>,
    http: reqwest::Client,
    events: mpsc::Sender<StatusEvent>,
    stop: watch::Receiver<bool>,
}

impl HealthMonitor {
    pub fn new(
        cfg: Arc<SupervisorConfig>,
        ctl: Arc<dyn ProcessController>,
        services: Vec<Arc<ServiceProcess>>,
        events: mpsc::Sender<StatusEvent>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .connect_timeout(cfg.connect_timeout)
            .build()
            .unwrap_or_default();
        Self {
            cfg,
            ctl,
            services,
            http,
            events,
            stop,
        }
    }

    pub async fn run(mut self) {
        let mut records: HashMap<String, HealthRecord> = HashMap::new();
        loop {
            if *self.stop.borrow() {
                break;
            }
            self.tick(&mut records).await;

            let interval = choose_interval(&self.cfg, Instant::now(), records.values());
            tokio::select! {
                () = sleep(interval) => {}
                changed = self.stop.changed() => {
                    if changed.is_err() || *self.stop.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("health monitor stopped");
    }

    /// One probe pass over every service. A slow or failing probe only
    /// affects its own service's status.
    async fn tick(&self, records: &mut HashMap<String, HealthRecord>) {
        for svc in &self.services {
            let key = svc.definition().key.clone();
            let snap = svc.snapshot().await;
            let record = records.entry(key.clone()).or_default();

            let status = self.check_service(svc, &snap, record).await;

            // A stop was requested, we could not make it stick, and the
            // thing is demonstrably serving. Say so once, not every tick.
            if status == HealthStatus::Healthy
                && snap.externally_managed
                && !snap.requested_running
            {
                if !record.warned_external {
                    record.warned_external = true;
                    tracing::warn!(
                        key = %key,
                        "service is healthy but managed outside this supervisor; stop had no effect"
                    );
                }
            } else {
                record.warned_external = false;
            }

            if status == HealthStatus::Starting && record.last != HealthStatus::Starting {
                record.last_starting = Some(Instant::now());
            }
            match status {
                HealthStatus::Healthy => {
                    record.fails = 0;
                    record.ever_healthy = true;
                    if record.healthy_since.is_none() {
                        record.healthy_since = Some(Instant::now());
                    }
                }
                HealthStatus::Stopped => {
                    record.fails = 0;
                    record.ever_healthy = false;
                    record.healthy_since = None;
                }
                HealthStatus::Starting | HealthStatus::Unhealthy => {
                    record.healthy_since = None;
                }
            }
            // Transitions are judged against what this loop last saw,
            // not against the service's current state: a crash handler
            // may already have written Stopped there, and that death
            // still has to go out as an event.
            let changed = status != record.last;
            record.last = status;

            svc.record_health(status).await;
            if changed {
                tracing::info!(key = %key, %status, "status changed");
                let _ = self.events.send(StatusEvent { key, status }).await;
            }
        }
    }

    async fn check_service(
        &self,
        svc: &Arc<ServiceProcess>,
        snap: &ServiceSnapshot,
        record: &mut HealthRecord,
    ) -> HealthStatus {
        let def = svc.definition();

        // Services with a known port can be discovered even when this
        // supervisor never started them.
        let mut pid = snap.effective_pid;
        if pid.is_none() {
            if let Some(port) = def.port {
                if let Some(owner) = self.ctl.find_pid_by_port(port).await {
                    svc.note_detected_pid(owner).await;
                    pid = Some(owner);
                }
            }
        }
        let alive = match pid {
            Some(pid) => self.ctl.is_alive(pid).await,
            None => false,
        };

        match &def.kind {
            ServiceKind::Http { health_url } => {
                let outcome = self.probe_http(health_url).await;
                if outcome == HttpProbe::Up {
                    record.fails = 0;
                } else {
                    record.fails += 1;
                }
                resolve_http(outcome, snap, alive, record, def.grace_attempts)
            }
            ServiceKind::Worker { broker_addr } => {
                if !alive {
                    return HealthStatus::Stopped;
                }
                let reachable = self.broker_reachable(broker_addr).await;
                if reachable {
                    record.fails = 0;
                    HealthStatus::Healthy
                } else {
                    record.fails += 1;
                    if snap.health == HealthStatus::Starting && record.fails <= def.grace_attempts
                    {
                        HealthStatus::Starting
                    } else {
                        HealthStatus::Unhealthy
                    }
                }
            }
            ServiceKind::ContainerGroup { list_cmd } => {
                let output = self
                    .ctl
                    .run_probe(list_cmd, self.cfg.probe_timeout)
                    .await;
                let status = resolve_container(output.as_deref(), snap);
                if status == HealthStatus::Healthy {
                    record.fails = 0;
                } else {
                    record.fails += 1;
                }
                if status != HealthStatus::Healthy
                    && snap.health == HealthStatus::Starting
                    && record.fails <= def.grace_attempts
                {
                    HealthStatus::Starting
                } else {
                    status
                }
            }
            ServiceKind::Plain => {
                if alive {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Stopped
                }
            }
        }
    }

    async fn probe_http(&self, url: &str) -> HttpProbe {
        match self.http.get(url).send().await {
            Ok(resp) if resp.status().is_success() => HttpProbe::Up,
            Ok(resp) => HttpProbe::HttpError(resp.status().as_u16()),
            Err(_) => HttpProbe::Unreachable,
        }
    }

    async fn broker_reachable(&self, addr: &str) -> bool {
        matches!(
            timeout(self.cfg.connect_timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}

/// HTTP health resolution with startup grace. Pure so the edge cases are
/// directly testable.
fn resolve_http(
    outcome: HttpProbe,
    snap: &ServiceSnapshot,
    alive: bool,
    record: &HealthRecord,
    grace_attempts: u32,
) -> HealthStatus {
    if outcome == HttpProbe::Up {
        return HealthStatus::Healthy;
    }

    // Nothing started, nothing detected, nothing asked for: the silence
    // is just a stopped service, not a failure.
    if !snap.running && !snap.requested_running && !alive {
        return HealthStatus::Stopped;
    }

    // Consecutive failures are forgiven while the service is starting.
    if snap.health == HealthStatus::Starting && record.fails <= grace_attempts {
        return HealthStatus::Starting;
    }

    match outcome {
        // The server answered; it exists but is broken.
        HttpProbe::HttpError(_) => HealthStatus::Unhealthy,
        HttpProbe::Unreachable => {
            if alive {
                // Process holds on but does not serve.
                HealthStatus::Unhealthy
            } else if record.ever_healthy {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Stopped
            }
        }
        HttpProbe::Up => unreachable!(),
    }
}

/// A container group is healthy when its listing shows at least one
/// running container, stopped when the listing is empty, unhealthy when
/// containers exist but none runs (or the listing itself failed while
/// the group was wanted).
fn resolve_container(output: Option<&str>, snap: &ServiceSnapshot) -> HealthStatus {
    match output {
        Some(out) => {
            let lower = out.to_lowercase();
            if lower.contains("up") || lower.contains("running") {
                HealthStatus::Healthy
            } else if out.trim().is_empty() {
                HealthStatus::Stopped
            } else {
                HealthStatus::Unhealthy
            }
        }
        None => {
            if snap.requested_running || snap.running {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Stopped
            }
        }
    }
}

/// Pick the next probe interval from what the records show: tighter
/// while anything is starting, relaxed once everything has been healthy
/// for a while, the base rate otherwise.
fn choose_interval<'a>(
    cfg: &SupervisorConfig,
    now: Instant,
    records: impl IntoIterator<Item = &'a HealthRecord>,
) -> Duration {
    let mut any_healthy = false;
    let mut all_stable = true;
    let mut any_recent_start = false;
    let mut any_unsettled = false;

    for record in records {
        // The short interval holds for the whole window after a service
        // entered Starting, even once it has already come up. Only a
        // quiet window lets the loop relax again.
        if let Some(started) = record.last_starting {
            if now.duration_since(started) < cfg.startup_window {
                any_recent_start = true;
            }
        }
        match record.last {
            HealthStatus::Healthy => {
                any_healthy = true;
                let settled = record
                    .healthy_since
                    .is_some_and(|since| now.duration_since(since) >= cfg.stable_after);
                if !settled {
                    all_stable = false;
                }
            }
            HealthStatus::Stopped => {}
            HealthStatus::Starting | HealthStatus::Unhealthy => {
                any_unsettled = true;
            }
        }
    }

    if any_recent_start {
        cfg.startup_interval
    } else if any_healthy && all_stable && !any_unsettled {
        cfg.stable_interval
    } else {
        cfg.base_interval
    }
}
