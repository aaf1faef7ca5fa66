//! Top-level daemon wiring (spec §9): owns the runtime home, the ledger,
//! the kernel, the runner supervisor, and the delivery engine, and drives
//! them against the IPC surface. No ambient singletons — everything is
//! constructed explicitly and handed down, the way the teacher wires
//! `AppState` in `src/server/mod.rs::start_server` and the scheduler's
//! `SchedulerDaemon::start_loop` drives its own tick loop against
//! `tokio::signal::ctrl_c`.

use crate::config::global::GlobalConfig;
use crate::contracts::{Event, EventKind};
use crate::delivery::DeliveryEngine;
use crate::error::Result;
use crate::kernel::Kernel;
use crate::ledger::LedgerStore;
use crate::runner::Supervisor;
use crate::runtime_home::RuntimeHome;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Owns every long-lived component for one running daemon process.
/// Constructed once at startup; shared via `Arc` with the IPC layer and
/// the background tick loop.
pub struct Daemon {
    pub runtime_home: RuntimeHome,
    pub global_config: GlobalConfig,
    pub ledger: Arc<LedgerStore>,
    pub kernel: Arc<Kernel>,
    pub supervisor: Arc<Supervisor>,
    pub delivery: Arc<DeliveryEngine>,
}

impl Daemon {
    /// Wires every component against an already-resolved runtime home and
    /// loaded config. Does no I/O beyond what `LedgerStore`/`Supervisor`
    /// construction requires (both are lazy; they touch disk per group on
    /// first use, not here).
    pub fn new(runtime_home: RuntimeHome, global_config: GlobalConfig) -> Result<Self> {
        runtime_home.ensure_layout()?;
        let ledger = Arc::new(LedgerStore::new(runtime_home.groups_dir()));
        let kernel = Arc::new(Kernel::new(ledger.clone()));
        let supervisor = Arc::new(Supervisor::new(runtime_home.root()));
        let delivery = Arc::new(DeliveryEngine::new(
            ledger.clone(),
            kernel.clone(),
            supervisor.clone(),
            runtime_home.clone(),
        ));
        Ok(Self { runtime_home, global_config, ledger, kernel, supervisor, delivery })
    }

    /// Resolves the default runtime home, loads (or defaults) the global
    /// config, and wires the daemon. The binary's `main` calls this after
    /// installing the tracing subscriber, so early config/IO errors are
    /// still logged with the right filter.
    pub fn bootstrap() -> Result<Self> {
        let runtime_home = RuntimeHome::resolve()?;
        runtime_home.ensure_layout()?;
        let global_config = GlobalConfig::load(&runtime_home.global_config_path())?;
        Self::new(runtime_home, global_config)
    }

    /// For every group recorded in the registry: warms its kernel
    /// projection, adopts any orphaned actor process left behind by a
    /// previous daemon instance, and seeds its delivery/automation state
    /// (spec §4.3 "daemon restart"; spec §8 "warm vs cold start agree").
    pub async fn adopt_all_orphans(&self) -> Result<()> {
        let registry = self.runtime_home.load_registry()?;
        for group_id in registry.groups.keys() {
            self.kernel.ensure_loaded(group_id)?;
            self.supervisor.adopt_orphans(group_id).await?;
            self.delivery.ensure_group(group_id).await;
        }
        Ok(())
    }

    /// Appends one event, feeds the kernel projection, then drives the
    /// delivery pipeline. This is the single path every mutating IPC
    /// handler commits an event through (spec §2's control flow:
    /// "validates it, checks permissions, appends... updates in-memory
    /// projections, and wakes subscribers and the delivery engine").
    /// Permission/state-gate checks happen in the caller via
    /// `Kernel::authorize` before this is ever reached.
    pub async fn commit(
        &self,
        group_id: &str,
        kind: EventKind,
        by: &str,
        data: serde_json::Value,
    ) -> Result<Event> {
        let event = self.ledger.append(group_id, kind, by, data).await?;
        self.kernel.apply_committed(&event);
        self.delivery.on_commit(&event).await?;
        Ok(event)
    }

    /// 1 Hz delivery/automation heartbeat (spec §4.4). Runs until told to
    /// stop via `shutdown`.
    async fn tick_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.delivery.tick(chrono::Utc::now()).await {
                        tracing::warn!(error = %e, "delivery tick failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// Runs the daemon until `ctrl-c` or the IPC listener exits: adopts
    /// orphaned actor processes, then drives the IPC surface and the
    /// delivery heartbeat concurrently. Grounded on the teacher's
    /// `SchedulerDaemon::start_loop` (`tokio::select!` racing a tick loop
    /// against `tokio::signal::ctrl_c`), generalized from one loop to a
    /// tick task plus an IPC accept task sharing one shutdown signal.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        self.adopt_all_orphans().await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tick_daemon = self.clone();
        let tick_shutdown = shutdown_rx.clone();
        let tick_handle = tokio::spawn(async move { tick_daemon.tick_loop(tick_shutdown).await });

        let ipc_daemon = self.clone();
        let ipc_shutdown = shutdown_rx.clone();
        let ipc_handle = tokio::spawn(async move { crate::ipc::serve(ipc_daemon, ipc_shutdown).await });

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("received ctrl-c, shutting down");
            }
            res = ipc_handle => {
                match res {
                    Ok(Err(e)) => tracing::error!(error = %e, "ipc server exited with an error"),
                    Err(e) => tracing::error!(error = %e, "ipc server task panicked"),
                    Ok(Ok(())) => tracing::info!("ipc server exited"),
                }
            }
        }

        let _ = shutdown_tx.send(true);
        let _ = tick_handle.await;
        self.remove_pid();
        Ok(())
    }

    pub fn pid_path(&self) -> std::path::PathBuf {
        self.runtime_home.daemon_pid_path()
    }

    /// Writes the daemon's own pid file, mirroring the teacher's
    /// `cli::daemon::handle_daemon_run`/`SchedulerDaemon::write_pid`
    /// (advisory file under the runtime home rather than a system service
    /// manager integration).
    pub fn write_pid(&self) -> Result<()> {
        crate::util::atomic_write(&self.pid_path(), std::process::id().to_string().as_bytes())
    }

    pub fn remove_pid(&self) {
        let _ = std::fs::remove_file(self.pid_path());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::ChatMessage;

    fn temp_home() -> RuntimeHome {
        RuntimeHome::at(std::env::temp_dir().join(format!("cccc-test-daemon-{}", uuid::Uuid::new_v4())))
    }

    #[tokio::test]
    async fn commit_feeds_both_kernel_and_delivery() {
        let home = temp_home();
        let daemon = Daemon::new(home.clone(), GlobalConfig::default()).unwrap();

        daemon
            .commit(
                "g1",
                EventKind::ActorAdd,
                "user",
                serde_json::json!({ "actor_id": "a1", "runtime": "claude", "runner": "headless", "command": [] }),
            )
            .await
            .unwrap();

        let foreman = daemon.kernel.with_projection("g1", |p| p.foreman_id().map(String::from)).unwrap();
        assert_eq!(foreman.as_deref(), Some("a1"));

        let msg = ChatMessage::broadcast("hi a1");
        daemon.commit("g1", EventKind::ChatMessage, "user", serde_json::to_value(&msg).unwrap()).await.unwrap();

        let _ = std::fs::remove_dir_all(home.root());
    }

    #[tokio::test]
    async fn adopt_all_orphans_warms_every_registered_group() {
        let home = temp_home();
        home.ensure_layout().unwrap();
        let daemon = Daemon::new(home.clone(), GlobalConfig::default()).unwrap();

        daemon.commit("g1", EventKind::ActorAdd, "user", serde_json::json!({
            "actor_id": "a1", "runtime": "claude", "runner": "headless", "command": []
        })).await.unwrap();

        let mut registry = home.load_registry().unwrap();
        registry.groups.insert(
            "g1".to_string(),
            crate::runtime_home::RegistryEntry {
                group_id: "g1".into(),
                title: "Group One".into(),
                extra: Default::default(),
            },
        );
        home.save_registry(&registry).unwrap();

        let cold = Daemon::new(home.clone(), GlobalConfig::default()).unwrap();
        cold.adopt_all_orphans().await.unwrap();
        let foreman = cold.kernel.with_projection("g1", |p| p.foreman_id().map(String::from)).unwrap();
        assert_eq!(foreman.as_deref(), Some("a1"));

        let _ = std::fs::remove_dir_all(home.root());
    }
}
