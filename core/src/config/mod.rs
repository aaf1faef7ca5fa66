//! Two-tier configuration (spec §6, ambient section): a global daemon
//! config in TOML and per-group settings in YAML. Grounded on the
//! teacher's `config/manager.rs` (TOML round-trip, `#[serde(default)]`
//! heavy) and `config/store.rs` (`load`/`save` pair with atomic writes),
//! generalized from LLM profiles/rate limits to groups and delivery
//! knobs. Both loaders preserve unknown keys via `#[serde(flatten)]
//! extra`, matching spec §9's forward-compatibility note.

pub mod blueprint;
pub mod global;
pub mod group_settings;

pub use blueprint::Blueprint;
pub use global::GlobalConfig;
pub use group_settings::GroupSettings;
