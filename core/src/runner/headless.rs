//! Headless runner: no child process; the agent polls via MCP. Liveness
//! is tracked by the last heartbeat/inbox poll rather than a process
//! handle (spec §4.3).

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadlessStatus {
    Online,
    Busy,
    Offline,
}

pub struct HeadlessRunner {
    status: HeadlessStatus,
    last_poll: DateTime<Utc>,
    offline_after: chrono::Duration,
}

impl HeadlessRunner {
    pub fn new(offline_after: chrono::Duration) -> Self {
        Self { status: HeadlessStatus::Offline, last_poll: Utc::now(), offline_after }
    }

    /// Call on every inbox poll / heartbeat from the agent.
    pub fn record_poll(&mut self, status: HeadlessStatus) {
        self.last_poll = Utc::now();
        self.status = status;
    }

    /// Current status, demoted to `Offline` if no poll arrived within the
    /// configured window even if the last recorded status was `Online`/`Busy`.
    pub fn status(&self) -> HeadlessStatus {
        if Utc::now() - self.last_poll > self.offline_after {
            HeadlessStatus::Offline
        } else {
            self.status
        }
    }

    pub fn last_poll(&self) -> DateTime<Utc> {
        self.last_poll
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_demotes_to_offline_after_silence_window() {
        let mut runner = HeadlessRunner::new(chrono::Duration::seconds(0));
        runner.record_poll(HeadlessStatus::Online);
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(runner.status(), HeadlessStatus::Offline);
    }

    #[test]
    fn status_stays_online_within_window() {
        let mut runner = HeadlessRunner::new(chrono::Duration::seconds(60));
        runner.record_poll(HeadlessStatus::Busy);
        assert_eq!(runner.status(), HeadlessStatus::Busy);
    }
}
