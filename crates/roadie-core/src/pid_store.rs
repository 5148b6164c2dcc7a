use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};

use crate::process::ProcessController;

const PID_FILE: &str = "pids.json";

/// Persisted fingerprint of a process we started. Every field beyond the
/// pid is optional; absent fields never block verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PidEntry {
    pub pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmdline: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
}

/// Outcome of matching a live pid against a stored fingerprint. Callers
/// decide what to do with `Unknown` instead of relying on a bare bool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    /// Alive and at least one fingerprint field matched.
    Verified,
    /// Dead, or every present fingerprint field failed to match.
    Contradicted,
    /// Alive but no fingerprint field could be checked.
    Unknown,
}

/// Durable service-key → pid map, one JSON file on disk. I/O failures
/// degrade to an empty store; a broken disk never takes the supervisor
/// down.
#[derive(Debug)]
pub struct PidStore {
    path: PathBuf,
    // Serializes read-modify-write cycles on the file.
    write_lock: Mutex<()>,
}

impl PidStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join(PID_FILE),
            write_lock: Mutex::new(()),
        }
    }

    pub fn load_all(&self) -> BTreeMap<String, PidEntry> {
        let Ok(text) = std::fs::read_to_string(&self.path) else {
            return BTreeMap::new();
        };
        match serde_json::from_str(&text) {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "pid file unreadable, treating as empty");
                BTreeMap::new()
            }
        }
    }

    pub fn load(&self, key: &str) -> Option<PidEntry> {
        self.load_all().remove(key)
    }

    pub fn save(&self, key: &str, entry: PidEntry) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.load_all();
        entries.insert(key.to_owned(), entry);
        self.write(&entries);
    }

    pub fn clear(&self, key: &str) {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut entries = self.load_all();
        if entries.remove(key).is_some() {
            self.write(&entries);
        }
    }

    /// Drop every entry whose pid is no longer alive, rewrite the file
    /// and return the survivors. Runs once at supervisor startup.
    pub async fn sweep_stale(&self, ctl: &dyn ProcessController) -> BTreeMap<String, PidEntry> {
        let entries = self.load_all();
        let mut survivors = BTreeMap::new();
        for (key, entry) in entries {
            if ctl.is_alive(entry.pid).await {
                survivors.insert(key, entry);
            } else {
                tracing::debug!(key, pid = entry.pid, "dropping stale pid entry");
            }
        }
        {
            let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
            self.write(&survivors);
        }
        survivors
    }

    /// Check whether the live process behind `entry.pid` is still the
    /// process we once recorded, to reject pid reuse by a stranger.
    pub async fn verify(&self, ctl: &dyn ProcessController, entry: &PidEntry) -> Verification {
        if !ctl.is_alive(entry.pid).await {
            return Verification::Contradicted;
        }

        let mut matched = false;
        let mut contradicted = false;

        if let Some(port) = entry.port {
            match ctl.find_pid_by_port(port).await {
                Some(owner) if owner == entry.pid => matched = true,
                Some(_) => contradicted = true,
                // Lookup failed or nothing bound; contributes nothing.
                None => {}
            }
        }

        if let Some(want) = &entry.cmdline {
            match ctl.command_line(entry.pid).await {
                Some(live) if live.contains(want.as_str()) => matched = true,
                Some(_) => contradicted = true,
                None => {}
            }
        }

        if let Some(want) = &entry.start_time {
            match ctl.start_time(entry.pid).await {
                Some(live) if &live == want => matched = true,
                Some(_) => contradicted = true,
                None => {}
            }
        }

        if matched {
            Verification::Verified
        } else if contradicted {
            Verification::Contradicted
        } else {
            Verification::Unknown
        }
    }

    fn write(&self, entries: &BTreeMap<String, PidEntry>) {
        if let Some(dir) = self.path.parent() {
            if let Err(err) = std::fs::create_dir_all(dir) {
                tracing::warn!(dir = %dir.display(), %err, "cannot create state directory, pid not persisted");
                return;
            }
        }
        let text = match serde_json::to_string_pretty(entries) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(%err, "cannot serialize pid entries");
                return;
            }
        };
        if let Err(err) = std::fs::write(&self.path, text) {
            tracing::warn!(path = %self.path.display(), %err, "cannot write pid file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::MockProcessControl;

    fn store() -> (tempfile::TempDir, PidStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PidStore::new(dir.path());
        (dir, store)
    }

    fn entry(pid: u32) -> PidEntry {
        PidEntry {
            pid,
            port: None,
            cmdline: None,
            start_time: None,
        }
    }

    #[test]
    fn save_overwrites_and_load_roundtrips() {
        let (_dir, store) = store();
        store.save("api", entry(100));
        store.save("api", entry(200));
        assert_eq!(store.load("api").unwrap().pid, 200);
        assert_eq!(store.load_all().len(), 1);
    }

    #[test]
    fn clear_removes_entry() {
        let (_dir, store) = store();
        store.save("api", entry(100));
        store.clear("api");
        assert!(store.load("api").is_none());
    }

    #[test]
    fn corrupt_file_is_empty_store() {
        let (dir, store) = store();
        std::fs::write(dir.path().join(PID_FILE), "{not json").unwrap();
        assert!(store.load_all().is_empty());
        // Writes still work afterwards.
        store.save("api", entry(1));
        assert_eq!(store.load("api").unwrap().pid, 1);
    }

    #[tokio::test]
    async fn sweep_drops_dead_pids() {
        let (_dir, store) = store();
        let ctl = MockProcessControl::new();
        ctl.set_alive(100);
        store.save("alive", entry(100));
        store.save("dead", entry(200));

        let survivors = store.sweep_stale(&ctl).await;

        assert_eq!(survivors.len(), 1);
        assert!(survivors.contains_key("alive"));
        // The file itself was rewritten too.
        assert_eq!(store.load_all().len(), 1);
    }

    #[tokio::test]
    async fn verify_dead_pid_is_contradicted() {
        let (_dir, store) = store();
        let ctl = MockProcessControl::new();
        assert_eq!(
            store.verify(&ctl, &entry(999)).await,
            Verification::Contradicted
        );
    }

    #[tokio::test]
    async fn verify_alive_without_fingerprint_is_unknown() {
        let (_dir, store) = store();
        let ctl = MockProcessControl::new();
        ctl.set_alive(100);
        assert_eq!(store.verify(&ctl, &entry(100)).await, Verification::Unknown);
    }

    #[tokio::test]
    async fn verify_one_matching_field_wins_over_a_mismatch() {
        let (_dir, store) = store();
        let ctl = MockProcessControl::new();
        ctl.set_alive(100);
        ctl.set_cmdline(100, "python manage.py runserver");
        ctl.set_start_time(100, "2026-01-01T00:00:00+00:00");

        let e = PidEntry {
            pid: 100,
            port: None,
            cmdline: Some("manage.py".into()),
            start_time: Some("some other time".into()),
        };
        assert_eq!(store.verify(&ctl, &e).await, Verification::Verified);
    }

    #[tokio::test]
    async fn verify_port_owned_by_other_pid_contradicts() {
        let (_dir, store) = store();
        let ctl = MockProcessControl::new();
        ctl.set_alive(100);
        ctl.script_port(8080, vec![Some(555)]);

        let e = PidEntry {
            pid: 100,
            port: Some(8080),
            cmdline: None,
            start_time: None,
        };
        assert_eq!(store.verify(&ctl, &e).await, Verification::Contradicted);
    }
}
