//! Runner Supervisor (spec §4.3): owns agent child processes, mediates
//! message injection, and enforces the per-actor lifecycle state machine.
//! Grounded on the teacher's `terminal::pty::PtyManager` (the spawn/reader
//! thread/writer shape, generalized in `pty.rs`) and `cli::daemon`'s
//! pidfile start/stop pattern (advisory pid files under the runtime home
//! rather than a single daemon-wide pidfile).

pub mod descriptor;
pub mod headless;
pub mod lifecycle;
pub mod pty;

pub use descriptor::{descriptor_for, RuntimeDescriptor, SubmitKey};
pub use headless::{HeadlessRunner, HeadlessStatus};
pub use lifecycle::LifecycleState;
pub use pty::PtyRunner;

use crate::contracts::{Actor, RunnerKind};
use crate::error::{CcccError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;

enum RunnerHandle {
    Pty(PtyRunner),
    Headless(HeadlessRunner),
}

struct ActorProcess {
    lifecycle: LifecycleState,
    handle: Option<RunnerHandle>,
    pid: Option<u32>,
}

impl ActorProcess {
    fn new() -> Self {
        Self { lifecycle: LifecycleState::Stopped, handle: None, pid: None }
    }
}

/// Grace period `restart`/`stop` waits for the child to exit on its own
/// before sending a kill (spec §4.3 "graceful drain up to a timeout, then kill").
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Supervisor {
    runtime_home: PathBuf,
    actors: Mutex<HashMap<(String, String), ActorProcess>>,
}

impl Supervisor {
    pub fn new(runtime_home: impl Into<PathBuf>) -> Self {
        Self { runtime_home: runtime_home.into(), actors: Mutex::new(HashMap::new()) }
    }

    fn pidfile_path(&self, group_id: &str, actor_id: &str) -> PathBuf {
        self.runtime_home.join("groups").join(group_id).join("state").join("pids").join(format!("{actor_id}.pid"))
    }

    pub async fn lifecycle_of(&self, group_id: &str, actor_id: &str) -> LifecycleState {
        let actors = self.actors.lock().await;
        actors
            .get(&(group_id.to_string(), actor_id.to_string()))
            .map(|p| p.lifecycle)
            .unwrap_or(LifecycleState::Stopped)
    }

    /// Starts an actor's runner according to its `RunnerKind`. PTY actors
    /// spawn a child process under a pseudo-terminal; headless actors get
    /// a liveness tracker with no process. Writes an advisory pid file for
    /// PTY actors so a later daemon restart can adopt them.
    pub async fn start(&self, actor: &Actor) -> Result<()> {
        let key = (actor.group_id.clone(), actor.actor_id.clone());
        let mut actors = self.actors.lock().await;
        let process = actors.entry(key.clone()).or_insert_with(ActorProcess::new);

        process.lifecycle.validate_transition(LifecycleState::Starting)?;
        process.lifecycle = LifecycleState::Starting;

        let result = match actor.runner {
            RunnerKind::Pty => self.spawn_pty(actor),
            RunnerKind::Headless => Ok(RunnerHandle::Headless(HeadlessRunner::new(chrono::Duration::seconds(90)))),
        };

        match result {
            Ok(handle) => {
                if let RunnerHandle::Pty(ref pty) = handle {
                    if let Ok(Some(status)) = pty.try_wait() {
                        tracing::warn!(actor_id = %actor.actor_id, ?status, "actor exited immediately on start");
                    }
                    if let Some(pid) = pty.pid() {
                        process.pid = Some(pid);
                        if let Err(e) = self.write_pidfile(&actor.group_id, &actor.actor_id, pid) {
                            tracing::warn!(actor_id = %actor.actor_id, error = %e, "failed to write actor pid file");
                        }
                    }
                }
                process.handle = Some(handle);
                process.lifecycle = LifecycleState::Running;
                Ok(())
            }
            Err(e) => {
                process.lifecycle = LifecycleState::Crashed;
                tracing::error!(actor_id = %actor.actor_id, error = %e, "actor failed to start");
                Err(e)
            }
        }
    }

    fn spawn_pty(&self, actor: &Actor) -> Result<RunnerHandle> {
        let descriptor = descriptor_for(&actor.runtime);
        let command = if actor.command.is_empty() { descriptor.default_command } else { actor.command.clone() };
        let (runner, mut rx) = PtyRunner::spawn(&command, &descriptor.default_env, None, descriptor.submit_key, 1 << 20)?;

        let transcript = runner.transcript.clone();
        tokio::spawn(async move {
            while let Some(chunk) = rx.recv().await {
                transcript.lock().expect("transcript mutex poisoned").push(&chunk);
            }
        });

        Ok(RunnerHandle::Pty(runner))
    }

    /// Stop = graceful drain up to `DRAIN_TIMEOUT`, then kill (spec §4.3).
    pub async fn stop(&self, group_id: &str, actor_id: &str) -> Result<()> {
        let mut actors = self.actors.lock().await;
        let key = (group_id.to_string(), actor_id.to_string());
        let Some(process) = actors.get_mut(&key) else {
            return Err(CcccError::ActorNotRunning { actor_id: actor_id.to_string() });
        };

        process.lifecycle.validate_transition(LifecycleState::Stopping)?;
        process.lifecycle = LifecycleState::Stopping;

        if let Some(RunnerHandle::Pty(pty)) = &process.handle {
            let deadline = tokio::time::Instant::now() + DRAIN_TIMEOUT;
            loop {
                if matches!(pty.try_wait(), Ok(Some(_))) {
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    let _ = pty.kill();
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        process.handle = None;
        process.pid = None;
        process.lifecycle = LifecycleState::Stopped;
        let _ = std::fs::remove_file(self.pidfile_path(group_id, actor_id));
        Ok(())
    }

    pub async fn restart(&self, actor: &Actor) -> Result<()> {
        if self.lifecycle_of(&actor.group_id, &actor.actor_id).await != LifecycleState::Stopped {
            self.stop(&actor.group_id, &actor.actor_id).await?;
        }
        self.start(actor).await
    }

    /// Writes the rendered text into a running PTY actor (spec §4.3
    /// injection protocol). A no-op for headless actors, which discover
    /// messages via inbox polling instead.
    pub async fn inject(&self, group_id: &str, actor_id: &str, rendered_text: &str) -> Result<()> {
        let actors = self.actors.lock().await;
        let key = (group_id.to_string(), actor_id.to_string());
        let Some(process) = actors.get(&key) else {
            return Err(CcccError::ActorNotRunning { actor_id: actor_id.to_string() });
        };
        if process.lifecycle != LifecycleState::Running {
            return Err(CcccError::ActorNotRunning { actor_id: actor_id.to_string() });
        }
        match &process.handle {
            Some(RunnerHandle::Pty(pty)) => pty.inject(rendered_text),
            Some(RunnerHandle::Headless(_)) | None => Ok(()),
        }
    }

    /// Last time the actor's PTY produced output, for the actor-idle nudge
    /// (spec §4.4). `None` for headless actors or actors with no handle.
    pub async fn last_activity(&self, group_id: &str, actor_id: &str) -> Option<chrono::DateTime<chrono::Utc>> {
        let actors = self.actors.lock().await;
        let key = (group_id.to_string(), actor_id.to_string());
        match actors.get(&key).and_then(|p| p.handle.as_ref()) {
            Some(RunnerHandle::Pty(pty)) => Some(pty.last_activity()),
            _ => None,
        }
    }

    /// Records a headless actor's inbox poll/heartbeat (spec §4.3 liveness
    /// tracking). Errors if the actor has no running headless handle —
    /// a PTY actor or a stopped actor has nothing to record against.
    pub async fn record_headless_poll(&self, group_id: &str, actor_id: &str, status: HeadlessStatus) -> Result<()> {
        let mut actors = self.actors.lock().await;
        let key = (group_id.to_string(), actor_id.to_string());
        let Some(process) = actors.get_mut(&key) else {
            return Err(CcccError::ActorNotRunning { actor_id: actor_id.to_string() });
        };
        match &mut process.handle {
            Some(RunnerHandle::Headless(runner)) => {
                runner.record_poll(status);
                Ok(())
            }
            _ => Err(CcccError::ActorNotRunning { actor_id: actor_id.to_string() }),
        }
    }

    /// Current headless liveness status, `None` for PTY actors or actors
    /// with no handle at all.
    pub async fn headless_status(&self, group_id: &str, actor_id: &str) -> Option<HeadlessStatus> {
        let actors = self.actors.lock().await;
        let key = (group_id.to_string(), actor_id.to_string());
        match actors.get(&key).and_then(|p| p.handle.as_ref()) {
            Some(RunnerHandle::Headless(runner)) => Some(runner.status()),
            _ => None,
        }
    }

    pub async fn transcript_tail(&self, group_id: &str, actor_id: &str, lines: usize) -> Result<String> {
        let actors = self.actors.lock().await;
        let key = (group_id.to_string(), actor_id.to_string());
        match actors.get(&key).and_then(|p| p.handle.as_ref()) {
            Some(RunnerHandle::Pty(pty)) => {
                let tail = pty.transcript.lock().expect("transcript mutex poisoned");
                Ok(tail.last_n_lines(48, 160, lines))
            }
            Some(RunnerHandle::Headless(_)) | None => Ok(String::new()),
        }
    }

    /// On daemon startup: for every pid file found under the runtime home,
    /// check whether the process is still alive. Alive processes are
    /// adopted (marked `Running` without re-spawning); dead ones are
    /// reaped (pid file removed, state left `Stopped`) (spec §4.3).
    pub async fn adopt_orphans(&self, group_id: &str) -> Result<()> {
        let pids_dir = self.runtime_home.join("groups").join(group_id).join("state").join("pids");
        if !pids_dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(&pids_dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(actor_id) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            let Ok(contents) = std::fs::read_to_string(&path) else { continue };
            let Ok(pid) = contents.trim().parse::<u32>() else { continue };

            if process_is_alive(pid) {
                tracing::info!(%actor_id, pid, "adopted orphaned actor process");
                let mut actors = self.actors.lock().await;
                let key = (group_id.to_string(), actor_id.to_string());
                let process = actors.entry(key).or_insert_with(ActorProcess::new);
                process.lifecycle = LifecycleState::Running;
                process.pid = Some(pid);
            } else {
                tracing::info!(%actor_id, pid, "reaping stale pid file");
                let _ = std::fs::remove_file(&path);
            }
        }
        Ok(())
    }

    fn write_pidfile(&self, group_id: &str, actor_id: &str, pid: u32) -> Result<()> {
        crate::util::atomic_write(&self.pidfile_path(group_id, actor_id), pid.to_string().as_bytes())
    }
}

/// `kill -0` performs no-op permission/existence checks without sending a
/// real signal; matches the teacher's `Command::new("kill")` shell-out in
/// `cli::daemon` rather than reaching for an unsafe libc FFI call.
#[cfg(unix)]
fn process_is_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn process_is_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{ActorRole, RuntimeKind};

    fn mk_actor(runner: RunnerKind) -> Actor {
        Actor {
            group_id: "g1".into(),
            actor_id: "a1".into(),
            role: ActorRole::Peer,
            runtime: RuntimeKind::Custom("true".into()),
            runner,
            command: vec!["true".to_string()],
            enabled: true,
            running: false,
            profile: None,
        }
    }

    #[tokio::test]
    async fn headless_start_and_stop_round_trip() {
        let dir = std::env::temp_dir().join(format!("cccc-test-runner-{}", uuid::Uuid::new_v4()));
        let supervisor = Supervisor::new(dir.clone());
        let actor = mk_actor(RunnerKind::Headless);

        supervisor.start(&actor).await.unwrap();
        assert_eq!(supervisor.lifecycle_of("g1", "a1").await, LifecycleState::Running);

        supervisor.stop("g1", "a1").await.unwrap();
        assert_eq!(supervisor.lifecycle_of("g1", "a1").await, LifecycleState::Stopped);

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn headless_poll_is_recorded_and_observable() {
        let dir = std::env::temp_dir().join(format!("cccc-test-runner-{}", uuid::Uuid::new_v4()));
        let supervisor = Supervisor::new(dir.clone());
        let actor = mk_actor(RunnerKind::Headless);
        supervisor.start(&actor).await.unwrap();

        assert_eq!(supervisor.headless_status("g1", "a1").await, Some(HeadlessStatus::Offline));
        supervisor.record_headless_poll("g1", "a1", HeadlessStatus::Online).await.unwrap();
        assert_eq!(supervisor.headless_status("g1", "a1").await, Some(HeadlessStatus::Online));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn polling_a_pty_actor_is_rejected() {
        let dir = std::env::temp_dir().join(format!("cccc-test-runner-{}", uuid::Uuid::new_v4()));
        let supervisor = Supervisor::new(dir.clone());
        let actor = mk_actor(RunnerKind::Pty);
        supervisor.start(&actor).await.unwrap();

        let err = supervisor.record_headless_poll("g1", "a1", HeadlessStatus::Online).await.unwrap_err();
        assert_eq!(err.code(), "actor_not_running");
        supervisor.stop("g1", "a1").await.ok();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn injecting_into_a_stopped_actor_fails() {
        let dir = std::env::temp_dir().join(format!("cccc-test-runner-{}", uuid::Uuid::new_v4()));
        let supervisor = Supervisor::new(dir.clone());
        let err = supervisor.inject("g1", "a1", "hello").await.unwrap_err();
        assert_eq!(err.code(), "actor_not_running");
        let _ = std::fs::remove_dir_all(dir);
    }
}
