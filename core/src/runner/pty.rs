//! PTY-attached runner: spawns the agent command under a pseudo-terminal,
//! captures a rolling transcript tail, and supports text injection (spec
//! §4.3). Grounded on the teacher's `terminal::pty::PtyManager` (reader
//! thread feeding an mpsc channel, `Arc<Mutex<Box<dyn Write + Send>>>`
//! writer) generalized from an interactive shell to an arbitrary actor
//! command, with an added capped transcript ring and a `vt100`-backed
//! ANSI-stripped view.

use crate::error::{CcccError, Result};
use crate::runner::descriptor::SubmitKey;
use chrono::{DateTime, Utc};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Rolling byte buffer of everything the PTY has emitted, capped at
/// `max_bytes` per actor (spec §6 `terminal_transcript.per_actor_bytes`).
pub struct TranscriptTail {
    bytes: VecDeque<u8>,
    max_bytes: usize,
    /// Timestamp of the most recent `push`, used by the actor-idle nudge
    /// (spec §4.4) to measure "no output for threshold" without writing
    /// transcript content to the ledger.
    last_activity: DateTime<Utc>,
}

impl TranscriptTail {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            bytes: VecDeque::with_capacity(max_bytes.min(1 << 20)),
            max_bytes,
            last_activity: Utc::now(),
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend(chunk.iter().copied());
        while self.bytes.len() > self.max_bytes {
            self.bytes.pop_front();
        }
        self.last_activity = Utc::now();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn raw(&self) -> Vec<u8> {
        self.bytes.iter().copied().collect()
    }

    /// ANSI-stripped view: replays the raw bytes through a `vt100` screen
    /// and reads back its plain-text contents. Never written to the
    /// ledger (spec §4.3); only surfaced via the `terminal tail` IPC op.
    pub fn plain_text(&self, rows: u16, cols: u16) -> String {
        let mut parser = vt100::Parser::new(rows, cols, 0);
        parser.process(&self.raw());
        parser.screen().contents()
    }

    pub fn last_n_lines(&self, rows: u16, cols: u16, n: usize) -> String {
        self.plain_text(rows, cols)
            .lines()
            .rev()
            .take(n)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub struct PtyRunner {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    master: Arc<Mutex<Box<dyn MasterPty + Send>>>,
    child: Arc<Mutex<Box<dyn Child + Send + Sync>>>,
    pub transcript: Arc<Mutex<TranscriptTail>>,
    submit_key: SubmitKey,
}

impl PtyRunner {
    /// Spawns `command` (argv\[0\] is the program) with `env` merged over
    /// the current process environment, attached to a fresh pseudo-terminal.
    /// Returns the runner plus a channel that yields every chunk read from
    /// the PTY, so callers can wire up notification/transcript consumers
    /// without the runner owning that policy.
    pub fn spawn(
        command: &[String],
        env: &std::collections::BTreeMap<String, String>,
        cwd: Option<&std::path::Path>,
        submit_key: SubmitKey,
        transcript_bytes: usize,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Vec<u8>>)> {
        let Some((program, args)) = command.split_first() else {
            return Err(CcccError::invalid_payload("actor command must have at least one argv element"));
        };

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize { rows: 24, cols: 80, pixel_width: 0, pixel_height: 0 })
            .map_err(|e| CcccError::internal(format!("openpty failed: {e}")))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        for (k, v) in env {
            cmd.env(k, v);
        }
        if let Some(cwd) = cwd {
            cmd.cwd(cwd);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| CcccError::internal(format!("failed to spawn actor command: {e}")))?;
        drop(pair.slave);

        let (tx, rx) = mpsc::unbounded_channel();
        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| CcccError::internal(format!("failed to clone pty reader: {e}")))?;
        std::thread::spawn(move || {
            let mut buffer = [0u8; 4096];
            loop {
                match std::io::Read::read(&mut reader, &mut buffer) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buffer[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| CcccError::internal(format!("failed to take pty writer: {e}")))?;

        Ok((
            Self {
                writer: Arc::new(Mutex::new(writer)),
                master: Arc::new(Mutex::new(pair.master)),
                child: Arc::new(Mutex::new(child)),
                transcript: Arc::new(Mutex::new(TranscriptTail::new(transcript_bytes))),
                submit_key,
            },
            rx,
        ))
    }

    pub fn resize(&self, rows: u16, cols: u16) -> Result<()> {
        let master = self.master.lock().expect("pty master mutex poisoned");
        master
            .resize(PtySize { rows, cols, pixel_width: 0, pixel_height: 0 })
            .map_err(|e| CcccError::internal(format!("pty resize failed: {e}")))
    }

    /// Writes `rendered_text` then the runtime's submit key (spec §4.3
    /// "writing to the PTY followed by a submit key, usually newline").
    pub fn inject(&self, rendered_text: &str) -> Result<()> {
        let mut writer = self.writer.lock().expect("pty writer mutex poisoned");
        writer.write_all(rendered_text.as_bytes())?;
        match self.submit_key {
            SubmitKey::Newline => writer.write_all(b"\n")?,
            SubmitKey::CtrlEnter => writer.write_all(b"\x0a")?,
        }
        writer.flush()?;
        Ok(())
    }

    pub fn record_chunk(&self, chunk: &[u8]) {
        self.transcript.lock().expect("transcript mutex poisoned").push(chunk);
    }

    /// Non-blocking liveness check; `Some(status)` once the child has exited.
    pub fn try_wait(&self) -> Result<Option<portable_pty::ExitStatus>> {
        let mut child = self.child.lock().expect("pty child mutex poisoned");
        child.try_wait().map_err(|e| CcccError::internal(format!("pty wait failed: {e}")))
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.lock().expect("pty child mutex poisoned").process_id()
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.transcript.lock().expect("transcript mutex poisoned").last_activity()
    }

    pub fn kill(&self) -> Result<()> {
        let mut child = self.child.lock().expect("pty child mutex poisoned");
        child.kill().map_err(|e| CcccError::internal(format!("pty kill failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_caps_at_max_bytes() {
        let mut tail = TranscriptTail::new(8);
        tail.push(b"0123456789");
        assert_eq!(tail.raw().len(), 8);
        assert_eq!(tail.raw(), b"23456789");
    }

    #[test]
    fn plain_text_strips_ansi_escapes() {
        let mut tail = TranscriptTail::new(4096);
        tail.push(b"\x1b[31mhello\x1b[0m");
        let text = tail.plain_text(24, 80);
        assert!(text.contains("hello"));
        assert!(!text.contains("\x1b"));
    }
}
