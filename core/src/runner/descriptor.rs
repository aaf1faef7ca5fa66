//! Per-runtime descriptor table (spec §9: "Dynamic dispatch over runtimes
//! becomes a closed tagged variant plus a per-runtime descriptor table.
//! Adding a runtime is a table entry; no dispatch through general
//! polymorphism.").

use crate::contracts::RuntimeKind;
use std::collections::BTreeMap;

/// Injection conventions for a runtime: how to submit injected text once
/// it has been written to the PTY (spec §4.3 "inject text").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitKey {
    Newline,
    CtrlEnter,
}

#[derive(Debug, Clone)]
pub struct RuntimeDescriptor {
    pub runtime: RuntimeKind,
    pub default_command: Vec<String>,
    pub default_env: BTreeMap<String, String>,
    pub submit_key: SubmitKey,
}

/// Looks up the descriptor for a known runtime, or a generic default for
/// `RuntimeKind::Custom`. Adding a new built-in runtime means adding a
/// match arm here, not a new trait impl.
pub fn descriptor_for(runtime: &RuntimeKind) -> RuntimeDescriptor {
    match runtime {
        RuntimeKind::Claude => RuntimeDescriptor {
            runtime: runtime.clone(),
            default_command: vec!["claude".to_string()],
            default_env: BTreeMap::new(),
            submit_key: SubmitKey::Newline,
        },
        RuntimeKind::Codex => RuntimeDescriptor {
            runtime: runtime.clone(),
            default_command: vec!["codex".to_string()],
            default_env: BTreeMap::new(),
            submit_key: SubmitKey::Newline,
        },
        RuntimeKind::Custom(name) => RuntimeDescriptor {
            runtime: runtime.clone(),
            default_command: vec![name.clone()],
            default_env: BTreeMap::new(),
            submit_key: SubmitKey::Newline,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_runtimes_have_a_default_command() {
        assert_eq!(descriptor_for(&RuntimeKind::Claude).default_command, vec!["claude"]);
        assert_eq!(descriptor_for(&RuntimeKind::Codex).default_command, vec!["codex"]);
    }

    #[test]
    fn custom_runtime_falls_back_to_its_own_name() {
        let d = descriptor_for(&RuntimeKind::Custom("aider".into()));
        assert_eq!(d.default_command, vec!["aider"]);
    }
}
