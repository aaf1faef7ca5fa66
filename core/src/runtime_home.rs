//! Layout of the runtime home directory (spec §6): `~/.cccc` by default,
//! containing `registry.json`, `daemon/{pid,log,socket}`, and
//! `groups/<group_id>/{group.yaml, ledger.jsonl, state/, blobs/}`.

use crate::error::{CcccError, Result};
use crate::util::atomic_write;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct RuntimeHome {
    root: PathBuf,
}

impl RuntimeHome {
    /// Resolves the default runtime home (`~/.cccc`), honoring `CCCC_HOME`
    /// the same way the teacher's config layer honors environment overrides.
    pub fn resolve() -> Result<Self> {
        if let Ok(override_path) = std::env::var("CCCC_HOME") {
            return Ok(Self::at(override_path));
        }
        let home = dirs::home_dir().ok_or_else(|| CcccError::internal("could not resolve home directory"))?;
        Ok(Self::at(home.join(".cccc")))
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join("registry.json")
    }

    pub fn global_config_path(&self) -> PathBuf {
        self.root.join("config.toml")
    }

    pub fn daemon_dir(&self) -> PathBuf {
        self.root.join("daemon")
    }

    pub fn daemon_pid_path(&self) -> PathBuf {
        self.daemon_dir().join("pid")
    }

    pub fn daemon_log_path(&self) -> PathBuf {
        self.daemon_dir().join("log")
    }

    pub fn daemon_socket_path(&self) -> PathBuf {
        self.daemon_dir().join("socket")
    }

    pub fn groups_dir(&self) -> PathBuf {
        self.root.join("groups")
    }

    pub fn group_dir(&self, group_id: &str) -> PathBuf {
        self.groups_dir().join(group_id)
    }

    pub fn group_settings_path(&self, group_id: &str) -> PathBuf {
        self.group_dir(group_id).join("group.yaml")
    }

    pub fn group_ledger_path(&self, group_id: &str) -> PathBuf {
        self.group_dir(group_id).join("ledger.jsonl")
    }

    pub fn group_state_dir(&self, group_id: &str) -> PathBuf {
        self.group_dir(group_id).join("state")
    }

    pub fn group_blobs_dir(&self, group_id: &str) -> PathBuf {
        self.group_dir(group_id).join("blobs")
    }

    pub fn ensure_layout(&self) -> Result<()> {
        std::fs::create_dir_all(self.daemon_dir())?;
        std::fs::create_dir_all(self.groups_dir())?;
        Ok(())
    }

    pub fn ensure_group_layout(&self, group_id: &str) -> Result<()> {
        std::fs::create_dir_all(self.group_state_dir(group_id))?;
        std::fs::create_dir_all(self.group_blobs_dir(group_id))?;
        Ok(())
    }

    pub fn load_registry(&self) -> Result<Registry> {
        Registry::load(&self.registry_path())
    }

    pub fn save_registry(&self, registry: &Registry) -> Result<()> {
        registry.save(&self.registry_path())
    }
}

/// Index of every known group so CLI/Web ports can list groups without
/// scanning the whole `groups/` directory tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Registry {
    pub schema_version: u32,
    pub groups: HashMap<String, RegistryEntry>,
    /// Unknown top-level keys are preserved on round-trip (spec §9).
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub group_id: String,
    pub title: String,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Registry {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self { schema_version: 1, groups: HashMap::new(), extra: HashMap::new() });
        }
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self { schema_version: 1, groups: HashMap::new(), extra: HashMap::new() });
        }
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        atomic_write(path, content.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_home() -> RuntimeHome {
        RuntimeHome::at(std::env::temp_dir().join(format!("cccc-test-home-{}", uuid::Uuid::new_v4())))
    }

    #[test]
    fn ensure_layout_creates_daemon_and_groups_dirs() {
        let home = temp_home();
        home.ensure_layout().unwrap();
        assert!(home.daemon_dir().exists());
        assert!(home.groups_dir().exists());
        let _ = std::fs::remove_dir_all(home.root());
    }

    #[test]
    fn registry_round_trips_and_preserves_unknown_fields() {
        let home = temp_home();
        home.ensure_layout().unwrap();

        let mut registry = Registry { schema_version: 1, groups: HashMap::new(), extra: HashMap::new() };
        registry.extra.insert("future_field".to_string(), serde_json::json!(true));
        registry.groups.insert(
            "g1".to_string(),
            RegistryEntry { group_id: "g1".into(), title: "My Group".into(), extra: HashMap::new() },
        );
        home.save_registry(&registry).unwrap();

        let loaded = home.load_registry().unwrap();
        assert_eq!(loaded.groups["g1"].title, "My Group");
        assert_eq!(loaded.extra["future_field"], serde_json::json!(true));

        let _ = std::fs::remove_dir_all(home.root());
    }

    #[test]
    fn loading_missing_registry_returns_empty_default() {
        let home = temp_home();
        let registry = home.load_registry().unwrap();
        assert!(registry.groups.is_empty());
    }
}
