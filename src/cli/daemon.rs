//! `cccc daemon run|start|stop`. Grounded on the teacher's
//! `cli::daemon::handle_daemon_run/start/stop` (pidfile-gated spawn,
//! `kill` shell-out to stop), adapted from the teacher's job scheduler
//! daemon to `cccc_core::Daemon`.

use super::DaemonAction;
use anyhow::{Context, Result};
use cccc_core::Daemon;
use std::fs;
use std::sync::Arc;

pub async fn dispatch(action: DaemonAction) -> Result<()> {
    match action {
        DaemonAction::Run => run().await,
        DaemonAction::Start => start(),
        DaemonAction::Stop => stop(),
    }
}

async fn run() -> Result<()> {
    let daemon = Arc::new(Daemon::bootstrap().context("failed to bootstrap daemon")?);
    daemon.write_pid().context("failed to write pid file")?;

    let result = daemon.clone().run().await;
    daemon.remove_pid();
    result.context("daemon exited with an error")
}

fn start() -> Result<()> {
    let home = cccc_core::runtime_home::RuntimeHome::resolve()?;
    let pid_path = home.daemon_pid_path();

    if pid_path.exists() {
        let pid = fs::read_to_string(&pid_path).unwrap_or_default();
        println!("daemon already running (pid {})", pid.trim());
        return Ok(());
    }

    let exe = std::env::current_exe().context("failed to resolve current executable")?;
    std::process::Command::new(exe).arg("daemon").arg("run").spawn().context("failed to spawn daemon process")?;

    println!("daemon started in background");
    Ok(())
}

fn stop() -> Result<()> {
    let home = cccc_core::runtime_home::RuntimeHome::resolve()?;
    let pid_path = home.daemon_pid_path();

    if !pid_path.exists() {
        println!("daemon is not running");
        return Ok(());
    }

    let pid_str = fs::read_to_string(&pid_path)?;
    let pid: i32 = pid_str.trim().parse().context("invalid pid in pid file")?;
    println!("stopping daemon (pid {})...", pid);

    #[cfg(unix)]
    {
        std::process::Command::new("kill").arg(pid.to_string()).status().context("failed to send signal")?;
    }
    #[cfg(windows)]
    {
        std::process::Command::new("taskkill").arg("/F").arg("/PID").arg(pid.to_string()).status().context("failed to send signal")?;
    }

    let _ = fs::remove_file(&pid_path);
    Ok(())
}
