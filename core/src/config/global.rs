//! Global daemon config: `~/.cccc/config.toml` (spec §6 "Global config").

use crate::error::Result;
use crate::util::atomic_write;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Debug,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_env_filter_directive(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalTranscriptConfig {
    #[serde(default = "default_per_actor_bytes")]
    pub per_actor_bytes: usize,
}

impl Default for TerminalTranscriptConfig {
    fn default() -> Self {
        Self { per_actor_bytes: default_per_actor_bytes() }
    }
}

fn default_per_actor_bytes() -> usize {
    1 << 20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalUiConfig {
    #[serde(default = "default_scrollback_lines")]
    pub scrollback_lines: usize,
}

impl Default for TerminalUiConfig {
    fn default() -> Self {
        Self { scrollback_lines: default_scrollback_lines() }
    }
}

fn default_scrollback_lines() -> usize {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IpcBind {
    UnixSocket,
    Tcp { addr: String },
}

impl Default for IpcBind {
    fn default() -> Self {
        Self::UnixSocket
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub developer_mode: bool,
    #[serde(default)]
    pub log_level: LogLevel,
    #[serde(default)]
    pub terminal_transcript: TerminalTranscriptConfig,
    #[serde(default)]
    pub terminal_ui: TerminalUiConfig,
    /// Bearer token required when `ipc_bind` is `Tcp` and the address is
    /// not loopback (spec §4.5). `None` on a fresh unix-socket-only setup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub ipc_bind: IpcBind,
    /// Unknown keys round-trip unchanged (spec §9).
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            developer_mode: false,
            log_level: LogLevel::default(),
            terminal_transcript: TerminalTranscriptConfig::default(),
            terminal_ui: TerminalUiConfig::default(),
            auth_token: None,
            ipc_bind: IpcBind::default(),
            extra: HashMap::new(),
        }
    }
}

impl GlobalConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(toml::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        atomic_write(path, content.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("cccc-test-config-{}.toml", uuid::Uuid::new_v4()))
    }

    #[test]
    fn loading_missing_file_returns_default() {
        let config = GlobalConfig::load(&temp_path()).unwrap();
        assert!(!config.developer_mode);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn round_trips_through_toml_preserving_unknown_keys() {
        let path = temp_path();
        let mut config = GlobalConfig::default();
        config.developer_mode = true;
        config.extra.insert("future_knob".to_string(), serde_json::json!(42));
        config.save(&path).unwrap();

        let loaded = GlobalConfig::load(&path).unwrap();
        assert!(loaded.developer_mode);
        assert_eq!(loaded.extra["future_knob"], serde_json::json!(42));

        let _ = std::fs::remove_file(path);
    }
}
