use std::process::Stdio;
use std::time::Duration;

use futures::StreamExt;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::{
    io::BufReader,
    process::{Child, Command},
    sync::Mutex,
    time::{sleep, timeout, Instant},
};
use tokio_util::io::ReaderStream;

use crate::{
    error::{Error, Result},
    process::{
        base::ProcessController,
        types::{CommandSpec, ProcId, Spawned},
    },
};

const PORT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

// Process creation flags, see CreateProcessW docs.
const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
const CREATE_BREAKAWAY_FROM_JOB: u32 = 0x0100_0000;
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Command-line fragments that identify an autoreload wrapper sitting at
/// the root of a respawning process tree. Reviewed against the tools we
/// actually supervise; not exhaustive.
const RELOADER_ROOT_PATTERNS: &[&str] = &[
    "cargo watch",
    "watchexec",
    "nodemon",
    "npm run",
    "pnpm run",
    "yarn dev",
    "vite",
    "uvicorn",
    "watchfiles",
    "watchmedo",
    "flask run",
];

const PARENT_CHAIN_DEPTH: usize = 6;

#[derive(Debug)]
struct ChildRec {
    child: Child,
    pid: u32,
}

#[derive(Debug, Default)]
pub struct WindowsProcessControl {
    children: Mutex<Vec<Option<ChildRec>>>,
    system: Mutex<System>,
}

impl WindowsProcessControl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn build_command(spec: &CommandSpec) -> Command {
        let mut cmd = Command::new(&spec.cmd[0]);
        if spec.cmd.len() > 1 {
            cmd.args(&spec.cmd[1..]);
        }
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }
        // Own group, out of our job object: supervisor exit must not take
        // the child down with it.
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | CREATE_BREAKAWAY_FROM_JOB | CREATE_NO_WINDOW);
        cmd
    }

    async fn taskkill(pid: u32, force: bool) -> bool {
        let pid_string = pid.to_string();
        let mut args = vec!["/PID", pid_string.as_str(), "/T"];
        if force {
            args.push("/F");
        }
        let status = timeout(
            Duration::from_secs(5),
            Command::new("taskkill")
                .args(&args)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status(),
        )
        .await;
        matches!(status, Ok(Ok(s)) if s.success())
    }

    async fn with_process<T>(&self, pid: u32, f: impl FnOnce(&sysinfo::Process) -> T) -> Option<T> {
        let mut sys = self.system.lock().await;
        sys.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]), true);
        sys.process(Pid::from_u32(pid)).map(f)
    }

    async fn parent_chain(&self, pid: u32) -> Vec<(u32, String)> {
        let mut sys = self.system.lock().await;
        sys.refresh_processes(ProcessesToUpdate::All, true);

        let mut chain = Vec::new();
        let mut current = Pid::from_u32(pid);
        for _ in 0..PARENT_CHAIN_DEPTH {
            let Some(proc) = sys.process(current) else {
                break;
            };
            let Some(parent) = proc.parent() else {
                break;
            };
            let Some(parent_proc) = sys.process(parent) else {
                break;
            };
            let cmdline = parent_proc
                .cmd()
                .iter()
                .map(|s| s.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ");
            chain.push((parent.as_u32(), cmdline));
            current = parent;
        }
        chain
    }
}

#[async_trait::async_trait]
impl ProcessController for WindowsProcessControl {
    async fn spawn(&self, spec: CommandSpec) -> Result<Spawned> {
        if spec.cmd.is_empty() {
            return Err(Error::Internal(format!("empty cmd for service `{}`", spec.name)));
        }

        let mut cmd = Self::build_command(&spec);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            service: spec.name.clone(),
            source,
        })?;

        let pid = child
            .id()
            .ok_or_else(|| Error::Internal(format!("service `{}` spawned with no pid", spec.name)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("stdout not piped".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("stderr not piped".into()))?;

        let out_stream = ReaderStream::new(BufReader::new(stdout))
            .filter_map(|res| async move { res.ok().map(|b| b.to_vec()) });
        let err_stream = ReaderStream::new(BufReader::new(stderr))
            .filter_map(|res| async move { res.ok().map(|b| b.to_vec()) });

        let mut children = self.children.lock().await;
        let id = ProcId(children.len() as u64);
        children.push(Some(ChildRec { child, pid }));

        Ok(Spawned {
            id,
            pid: Some(pid),
            stdout: Box::pin(out_stream),
            stderr: Box::pin(err_stream),
        })
    }

    async fn spawn_detached(&self, spec: CommandSpec) -> Result<Option<u32>> {
        if spec.cmd.is_empty() {
            return Err(Error::Internal(format!("empty cmd for service `{}`", spec.name)));
        }

        let mut cmd = Self::build_command(&spec);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            service: spec.name.clone(),
            source,
        })?;
        let pid = child.id();

        tokio::spawn(async move {
            let _ = child.wait().await;
        });

        Ok(pid)
    }

    async fn shutdown(&self, id: ProcId) -> Result<()> {
        let pid = {
            let children = self.children.lock().await;
            children
                .get(id.0 as usize)
                .ok_or_else(|| Error::Internal(format!("unknown process id {id:?}")))?
                .as_ref()
                .ok_or_else(|| Error::Internal(format!("already reaped process id {id:?}")))?
                .pid
        };
        // No SIGTERM on this platform; a plain taskkill is the polite
        // version, /F comes later from kill().
        Self::taskkill(pid, false).await;
        Ok(())
    }

    async fn wait(&self, id: ProcId, d: Duration) -> Result<Option<i32>> {
        let start = Instant::now();
        loop {
            {
                let mut children = self.children.lock().await;
                let proc = children
                    .get_mut(id.0 as usize)
                    .ok_or_else(|| Error::Internal(format!("unknown process id {id:?}")))?
                    .as_mut()
                    .ok_or_else(|| Error::Internal(format!("already reaped process id {id:?}")))?;

                if let Ok(Some(status)) = proc.child.try_wait() {
                    children[id.0 as usize] = None;
                    return Ok(Some(status.code().unwrap_or(-1)));
                }
            }

            if start.elapsed() >= d {
                return Ok(None);
            }
            sleep(Duration::from_millis(50)).await;
        }
    }

    async fn kill(&self, id: ProcId) -> Result<()> {
        let pid = {
            let children = self.children.lock().await;
            children
                .get(id.0 as usize)
                .ok_or_else(|| Error::Internal(format!("unknown process id {id:?}")))?
                .as_ref()
                .ok_or_else(|| Error::Internal(format!("already reaped process id {id:?}")))?
                .pid
        };
        Self::taskkill(pid, true).await;
        let _ = self.wait(id, Duration::from_millis(100)).await;
        Ok(())
    }

    async fn run_probe(&self, cmd: &[String], d: Duration) -> Option<String> {
        let (program, args) = cmd.split_first()?;
        let output = timeout(
            d,
            Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .creation_flags(CREATE_NO_WINDOW)
                .output(),
        )
        .await
        .ok()?
        .ok()?;
        Some(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn find_pid_by_port(&self, port: u16) -> Option<u32> {
        let lookup = tokio::task::spawn_blocking(move || {
            listeners::get_all()
                .ok()?
                .into_iter()
                .find(|listener| listener.socket.port() == port)
                .map(|listener| listener.process.pid)
        });
        timeout(PORT_LOOKUP_TIMEOUT, lookup).await.ok()?.ok()?
    }

    async fn is_alive(&self, pid: u32) -> bool {
        self.with_process(pid, |_| ()).await.is_some()
    }

    async fn command_line(&self, pid: u32) -> Option<String> {
        self.with_process(pid, |proc| {
            proc.cmd()
                .iter()
                .map(|s| s.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .await
        .filter(|line| !line.is_empty())
    }

    async fn start_time(&self, pid: u32) -> Option<String> {
        let secs = self.with_process(pid, sysinfo::Process::start_time).await?;
        let ts = chrono::DateTime::from_timestamp(secs as i64, 0)?;
        Some(ts.to_rfc3339())
    }

    async fn kill_tree(&self, pid: u32, force: bool) -> bool {
        if !self.is_alive(pid).await {
            return true;
        }
        Self::taskkill(pid, force).await || !self.is_alive(pid).await
    }

    async fn kill_stubborn_listener(&self, port: u16, tried: &[u32]) -> bool {
        let Some(owner) = self.find_pid_by_port(port).await else {
            return true;
        };

        for (ancestor, cmdline) in self.parent_chain(owner).await {
            if tried.contains(&ancestor) {
                continue;
            }
            if RELOADER_ROOT_PATTERNS.iter().any(|pat| cmdline.contains(pat)) {
                tracing::warn!(
                    port,
                    ancestor,
                    %cmdline,
                    "killing autoreload root above stubborn listener"
                );
                return Self::taskkill(ancestor, true).await;
            }
        }
        false
    }
}
