use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::Arc,
};

use roadie_types::{ServiceDefinition, StatusEvent, SupervisorConfig};
use tokio::sync::{mpsc, watch};

use crate::{
    error::{Error, Result},
    monitor::HealthMonitor,
    pid_store::{PidStore, Verification},
    process::ProcessController,
    service::{ServiceProcess, ServiceSnapshot},
};

/// Facade over the whole supervisor: owns every service, re-attaches to
/// processes that survived a previous run and keeps one monitor task
/// probing them all.
pub struct Supervisor {
    cfg: Arc<SupervisorConfig>,
    services: BTreeMap<String, Arc<ServiceProcess>>,
    defs: BTreeMap<String, ServiceDefinition>,
    /// Full dependency-ordered start sequence.
    order: Vec<String>,
    stop_tx: watch::Sender<bool>,
}

impl Supervisor {
    /// Build the supervisor, re-attach to persisted pids that check out
    /// and spawn the health monitor. Returns the status event stream
    /// alongside.
    pub async fn launch(
        defs: Vec<ServiceDefinition>,
        cfg: SupervisorConfig,
        ctl: Arc<dyn ProcessController>,
    ) -> Result<(Self, mpsc::Receiver<StatusEvent>)> {
        let cfg = Arc::new(cfg);
        let store = Arc::new(PidStore::new(&cfg.state_dir));

        let def_map: BTreeMap<String, ServiceDefinition> = defs
            .into_iter()
            .map(|def| (def.key.clone(), def))
            .collect();
        let all_keys: Vec<String> = def_map.keys().cloned().collect();
        let order = toposort(&def_map, &all_keys)?;

        let services: BTreeMap<String, Arc<ServiceProcess>> = def_map
            .iter()
            .map(|(key, def)| {
                let svc = ServiceProcess::new(
                    def.clone(),
                    cfg.clone(),
                    ctl.clone(),
                    store.clone(),
                );
                (key.clone(), Arc::new(svc))
            })
            .collect();

        // Pids persisted by a previous run: drop the dead, then only
        // re-attach where the live process still looks like ours.
        let survivors = store.sweep_stale(ctl.as_ref()).await;
        for (key, entry) in survivors {
            let Some(svc) = services.get(&key) else {
                tracing::debug!(key, "persisted pid for a service no longer defined");
                store.clear(&key);
                continue;
            };
            match store.verify(ctl.as_ref(), &entry).await {
                // Unknown means alive but unverifiable; keeping the
                // attachment beats orphaning a process we once started.
                Verification::Verified | Verification::Unknown => {
                    svc.adopt_persisted(&entry).await;
                }
                Verification::Contradicted => {
                    tracing::warn!(
                        key,
                        pid = entry.pid,
                        "persisted pid now belongs to a different process"
                    );
                    store.clear(&key);
                }
            }
        }

        let (events_tx, events_rx) = mpsc::channel(100);
        let (stop_tx, stop_rx) = watch::channel(false);
        let monitor = HealthMonitor::new(
            cfg.clone(),
            ctl,
            services.values().cloned().collect(),
            events_tx,
            stop_rx,
        );
        tokio::spawn(monitor.run());

        Ok((
            Self {
                cfg,
                services,
                defs: def_map,
                order,
                stop_tx,
            },
            events_rx,
        ))
    }

    pub fn service(&self, key: &str) -> Option<&Arc<ServiceProcess>> {
        self.services.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Start one service, bringing its dependencies up first.
    pub async fn start_service(&self, key: &str) -> Result<bool> {
        if !self.services.contains_key(key) {
            return Err(Error::UnknownService(key.to_owned()));
        }
        let chain = toposort(&self.defs, &[key.to_owned()])?;
        let mut started = true;
        for name in chain {
            let svc = self
                .services
                .get(&name)
                .ok_or_else(|| Error::UnknownService(name.clone()))?;
            let ok = svc.start().await?;
            if name == key {
                started = ok;
            } else if !ok {
                tracing::warn!(service = %key, dep = %name, "dependency refused to start");
            }
        }
        Ok(started)
    }

    /// Start everything in dependency order.
    pub async fn start_all(&self) -> Result<()> {
        for key in &self.order {
            if let Some(svc) = self.services.get(key) {
                svc.start().await?;
            }
        }
        Ok(())
    }

    pub async fn stop_service(&self, key: &str, graceful: bool) -> Result<()> {
        let svc = self
            .services
            .get(key)
            .ok_or_else(|| Error::UnknownService(key.to_owned()))?;
        svc.stop(graceful).await
    }

    /// Stop everything, dependents before their dependencies.
    pub async fn stop_all(&self, graceful: bool) -> Result<()> {
        for key in self.order.iter().rev() {
            if let Some(svc) = self.services.get(key) {
                svc.stop(graceful).await?;
            }
        }
        Ok(())
    }

    pub async fn restart_service(&self, key: &str) -> Result<bool> {
        self.stop_service(key, true).await?;
        tokio::time::sleep(self.cfg.restart_delay).await;
        self.start_service(key).await
    }

    pub async fn statuses(&self) -> Vec<ServiceSnapshot> {
        let mut out = Vec::with_capacity(self.services.len());
        for svc in self.services.values() {
            out.push(svc.snapshot().await);
        }
        out
    }

    /// Stop the monitor task. Supervised processes are left running on
    /// purpose; the pid store lets the next run pick them back up.
    pub fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Kahn's algorithm over the dependency graph reachable from `roots`,
/// with alphabetical tie-breaking so the order is deterministic.
fn toposort(
    defs: &BTreeMap<String, ServiceDefinition>,
    roots: &[String],
) -> Result<Vec<String>> {
    let mut to_process: VecDeque<String> = roots.iter().cloned().collect();
    let mut processed = HashSet::with_capacity(defs.len());
    let mut graph: HashMap<String, Vec<String>> = HashMap::with_capacity(defs.len());
    let mut deps_count: HashMap<String, usize> = HashMap::with_capacity(defs.len());

    while let Some(key) = to_process.pop_front() {
        if !processed.insert(key.clone()) {
            continue;
        }
        let Some(def) = defs.get(&key) else {
            return Err(Error::UnknownService(key));
        };

        graph.entry(key.clone()).or_default();
        let deps_count = deps_count.entry(key.clone()).or_default();

        for dep in &def.deps {
            if !defs.contains_key(dep) {
                return Err(Error::UnknownService(dep.clone()));
            }
            graph.entry(dep.clone()).or_default().push(key.clone());
            *deps_count += 1;
            to_process.push_back(dep.clone());
        }
    }

    let mut zeros: Vec<String> = deps_count
        .iter()
        .filter_map(|(key, &count)| (count == 0).then(|| key.clone()))
        .collect();
    zeros.sort();
    let mut queue: VecDeque<String> = zeros.into();

    for dependents in graph.values_mut() {
        dependents.sort();
    }

    let mut result = Vec::with_capacity(deps_count.len());
    while let Some(key) = queue.pop_front() {
        result.push(key.clone());

        if let Some(dependents) = graph.get(&key) {
            for dependent in dependents {
                if let Some(count) = deps_count.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        let mut v: Vec<_> = queue.into();
                        v.push(dependent.clone());
                        v.sort();
                        queue = v.into();
                    }
                }
            }
        }
    }

    if result.len() != processed.len() {
        return Err(Error::CircularDependencyDetected);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pid_store::PidEntry, process::MockProcessControl};
    use std::time::Duration;

    fn def(key: &str, deps: &[&str]) -> ServiceDefinition {
        let mut d = ServiceDefinition::new(key, vec![format!("run-{key}")]);
        d.deps = deps.iter().map(|s| (*s).to_owned()).collect();
        d
    }

    fn def_map(defs: Vec<ServiceDefinition>) -> BTreeMap<String, ServiceDefinition> {
        defs.into_iter().map(|d| (d.key.clone(), d)).collect()
    }

    fn test_cfg(dir: &tempfile::TempDir) -> SupervisorConfig {
        SupervisorConfig {
            state_dir: dir.path().join("state"),
            log_dir: dir.path().join("logs"),
            restart_delay: Duration::from_millis(1),
            ..SupervisorConfig::default()
        }
    }

    #[test]
    fn toposort_orders_dependencies_first() {
        let defs = def_map(vec![
            def("a", &["b", "c"]),
            def("b", &[]),
            def("c", &["d", "e"]),
            def("d", &["f"]),
            def("e", &[]),
            def("f", &[]),
        ]);
        let result = toposort(&defs, &["a".to_owned()]).unwrap();
        assert_eq!(result, vec!["b", "e", "f", "d", "c", "a"]);
    }

    #[test]
    fn toposort_rejects_cycles() {
        let defs = def_map(vec![def("a", &["b"]), def("b", &["a"])]);
        let err = toposort(&defs, &["a".to_owned()]).unwrap_err();
        assert!(matches!(err, Error::CircularDependencyDetected));
    }

    #[test]
    fn toposort_rejects_unknown_dependency() {
        let defs = def_map(vec![def("a", &["ghost"])]);
        let err = toposort(&defs, &["a".to_owned()]).unwrap_err();
        assert!(matches!(err, Error::UnknownService(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn start_service_brings_dependencies_up_first() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = Arc::new(MockProcessControl::new());
        let (sup, _events) = Supervisor::launch(
            vec![def("api", &["db"]), def("db", &[])],
            test_cfg(&dir),
            ctl.clone() as Arc<dyn ProcessController>,
        )
        .await
        .unwrap();

        assert!(sup.start_service("api").await.unwrap());

        let spawned: Vec<String> = ctl.spawned().iter().map(|s| s.name.clone()).collect();
        assert_eq!(spawned, vec!["db", "api"]);
    }

    #[tokio::test]
    async fn restart_stops_then_starts_again() {
        let dir = tempfile::tempdir().unwrap();
        let ctl = Arc::new(MockProcessControl::new());
        let (sup, _events) = Supervisor::launch(
            vec![def("api", &[])],
            test_cfg(&dir),
            ctl.clone() as Arc<dyn ProcessController>,
        )
        .await
        .unwrap();

        sup.start_service("api").await.unwrap();
        sup.restart_service("api").await.unwrap();
        assert_eq!(ctl.spawned().len(), 2);
    }

    #[tokio::test]
    async fn launch_adopts_verified_persisted_pid() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_cfg(&dir);
        let store = PidStore::new(&cfg.state_dir);
        store.save(
            "api",
            PidEntry {
                pid: 500,
                port: None,
                cmdline: Some("run-api".into()),
                start_time: None,
            },
        );

        let ctl = Arc::new(MockProcessControl::new());
        ctl.set_alive(500);
        ctl.set_cmdline(500, "run-api --with-flags");

        let (sup, _events) = Supervisor::launch(
            vec![def("api", &[])],
            cfg,
            ctl as Arc<dyn ProcessController>,
        )
        .await
        .unwrap();

        let snap = sup.service("api").unwrap().snapshot().await;
        assert!(snap.running);
        assert!(snap.externally_managed);
        assert_eq!(snap.effective_pid, Some(500));
    }

    #[tokio::test]
    async fn launch_rejects_reused_pid() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_cfg(&dir);
        let store = PidStore::new(&cfg.state_dir);
        store.save(
            "api",
            PidEntry {
                pid: 500,
                port: None,
                cmdline: Some("run-api".into()),
                start_time: None,
            },
        );

        let ctl = Arc::new(MockProcessControl::new());
        ctl.set_alive(500);
        // Same pid, completely different program: pid reuse.
        ctl.set_cmdline(500, "torrent-client --seed");

        let (sup, _events) = Supervisor::launch(
            vec![def("api", &[])],
            cfg.clone(),
            ctl as Arc<dyn ProcessController>,
        )
        .await
        .unwrap();

        let snap = sup.service("api").unwrap().snapshot().await;
        assert!(!snap.running);
        assert_eq!(snap.effective_pid, None);
        assert!(PidStore::new(&cfg.state_dir).load("api").is_none());
    }

    #[tokio::test]
    async fn launch_drops_entries_for_removed_services() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = test_cfg(&dir);
        let store = PidStore::new(&cfg.state_dir);
        store.save(
            "gone",
            PidEntry {
                pid: 700,
                port: None,
                cmdline: None,
                start_time: None,
            },
        );

        let ctl = Arc::new(MockProcessControl::new());
        ctl.set_alive(700);

        let (_sup, _events) = Supervisor::launch(
            vec![def("api", &[])],
            cfg.clone(),
            ctl as Arc<dyn ProcessController>,
        )
        .await
        .unwrap();

        assert!(PidStore::new(&cfg.state_dir).load("gone").is_none());
    }
}
