use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Mutex,
    time::Duration,
};

use async_trait::async_trait;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    error::Result,
    process::{base::ProcessController, CommandSpec, ProcId, Spawned},
};

#[derive(Default)]
struct MockState {
    alive: HashSet<u32>,
    cmdlines: HashMap<u32, String>,
    start_times: HashMap<u32, String>,
    /// Scripted port-owner sequences. Each lookup pops the front while
    /// more than one entry remains, so tests can play out a respawn.
    port_owners: HashMap<u16, VecDeque<Option<u32>>>,
    probe_output: Option<String>,
    spawned: Vec<CommandSpec>,
    killed: Vec<(u32, bool)>,
    escalated: Vec<u16>,
    escalation_succeeds: bool,
    next_pid: u32,
}

/// Fully scripted controller for tests: no real processes anywhere.
pub struct MockProcessControl {
    state: Mutex<MockState>,
}

impl Default for MockProcessControl {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProcessControl {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_pid: 42_000,
                ..MockState::default()
            }),
        }
    }

    pub fn set_alive(&self, pid: u32) {
        self.state.lock().unwrap().alive.insert(pid);
    }

    pub fn set_dead(&self, pid: u32) {
        self.state.lock().unwrap().alive.remove(&pid);
    }

    pub fn set_cmdline(&self, pid: u32, cmdline: &str) {
        self.state.lock().unwrap().cmdlines.insert(pid, cmdline.to_owned());
    }

    pub fn set_start_time(&self, pid: u32, start_time: &str) {
        self.state
            .lock()
            .unwrap()
            .start_times
            .insert(pid, start_time.to_owned());
    }

    pub fn script_port(&self, port: u16, owners: Vec<Option<u32>>) {
        self.state
            .lock()
            .unwrap()
            .port_owners
            .insert(port, owners.into());
    }

    pub fn set_probe_output(&self, output: &str) {
        self.state.lock().unwrap().probe_output = Some(output.to_owned());
    }

    pub fn set_escalation_succeeds(&self, succeeds: bool) {
        self.state.lock().unwrap().escalation_succeeds = succeeds;
    }

    pub fn killed(&self) -> Vec<(u32, bool)> {
        self.state.lock().unwrap().killed.clone()
    }

    pub fn escalated(&self) -> Vec<u16> {
        self.state.lock().unwrap().escalated.clone()
    }

    pub fn spawned(&self) -> Vec<CommandSpec> {
        self.state.lock().unwrap().spawned.clone()
    }
}

#[async_trait]
impl ProcessController for MockProcessControl {
    async fn spawn(&self, spec: CommandSpec) -> Result<Spawned> {
        let mut state = self.state.lock().unwrap();
        state.next_pid += 1;
        let pid = state.next_pid;
        state.alive.insert(pid);
        state.cmdlines.insert(pid, spec.display_line());
        let id = ProcId(u64::from(pid));
        state.spawned.push(spec);

        let (_, stdout) = tokio::sync::mpsc::channel(1);
        let (_, stderr) = tokio::sync::mpsc::channel(1);
        Ok(Spawned {
            id,
            pid: Some(pid),
            stdout: Box::pin(ReceiverStream::new(stdout)),
            stderr: Box::pin(ReceiverStream::new(stderr)),
        })
    }

    async fn spawn_detached(&self, spec: CommandSpec) -> Result<Option<u32>> {
        let mut state = self.state.lock().unwrap();
        state.next_pid += 1;
        let pid = state.next_pid;
        state.spawned.push(spec);
        Ok(Some(pid))
    }

    async fn shutdown(&self, id: ProcId) -> Result<()> {
        self.state.lock().unwrap().alive.remove(&(id.0 as u32));
        Ok(())
    }

    async fn wait(&self, id: ProcId, _d: Duration) -> Result<Option<i32>> {
        let alive = self.state.lock().unwrap().alive.contains(&(id.0 as u32));
        Ok(if alive { None } else { Some(0) })
    }

    async fn kill(&self, id: ProcId) -> Result<()> {
        self.state.lock().unwrap().alive.remove(&(id.0 as u32));
        Ok(())
    }

    async fn run_probe(&self, _cmd: &[String], _d: Duration) -> Option<String> {
        self.state.lock().unwrap().probe_output.clone()
    }

    async fn find_pid_by_port(&self, port: u16) -> Option<u32> {
        let mut state = self.state.lock().unwrap();
        let owners = state.port_owners.get_mut(&port)?;
        if owners.len() > 1 {
            owners.pop_front()?
        } else {
            owners.front().copied()?
        }
    }

    async fn is_alive(&self, pid: u32) -> bool {
        self.state.lock().unwrap().alive.contains(&pid)
    }

    async fn command_line(&self, pid: u32) -> Option<String> {
        self.state.lock().unwrap().cmdlines.get(&pid).cloned()
    }

    async fn start_time(&self, pid: u32) -> Option<String> {
        self.state.lock().unwrap().start_times.get(&pid).cloned()
    }

    async fn kill_tree(&self, pid: u32, force: bool) -> bool {
        let mut state = self.state.lock().unwrap();
        state.killed.push((pid, force));
        state.alive.remove(&pid);
        true
    }

    async fn kill_stubborn_listener(&self, port: u16, _tried: &[u32]) -> bool {
        let mut state = self.state.lock().unwrap();
        state.escalated.push(port);
        if state.escalation_succeeds {
            // The escalation clears whatever owner the script still holds.
            state.port_owners.insert(port, VecDeque::from([None]));
            true
        } else {
            false
        }
    }
}
