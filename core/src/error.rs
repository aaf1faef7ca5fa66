//! Stable error taxonomy surfaced over IPC (spec §7).
//!
//! Every variant maps to exactly one wire code. `CcccError::code()` is what
//! gets written into an IPC `error.code` field; `Display` (from `thiserror`)
//! produces the human-readable `message`.

use thiserror::Error;

/// Primary error type for CCCC daemon operations.
#[derive(Error, Debug)]
pub enum CcccError {
    // ---- Input -----------------------------------------------------
    #[error("invalid payload: {message}")]
    InvalidPayload { message: String },

    #[error("unknown operation: {op}")]
    UnknownOp { op: String },

    #[error("unknown recipient: {recipient}")]
    UnknownRecipient { recipient: String },

    #[error("no such group: {group_id}")]
    NoSuchGroup { group_id: String },

    #[error("no such actor: {actor_id} in group {group_id}")]
    NoSuchActor { group_id: String, actor_id: String },

    #[error("scope already attached: {scope_key}")]
    ScopeAlreadyAttached { scope_key: String },

    #[error("version conflict: expected {expected}, found {found}")]
    VersionConflict { expected: u64, found: u64 },

    // ---- Authorization ----------------------------------------------
    #[error("unauthorized")]
    Unauthorized,

    #[error("permission denied: {principal} may not {action}")]
    PermissionDenied { principal: String, action: String },

    #[error("group is stopped")]
    GroupStopped,

    // ---- State --------------------------------------------------------
    #[error("actor not running: {actor_id}")]
    ActorNotRunning { actor_id: String },

    #[error("actor already running: {actor_id}")]
    ActorAlreadyRunning { actor_id: String },

    #[error("foreman required but none present in group {group_id}")]
    ForemanRequired { group_id: String },

    // ---- Resource -------------------------------------------------------
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out")]
    Timeout,

    #[error("subscriber lagged, resync from the ledger")]
    Lagged,

    // ---- Internal -------------------------------------------------------
    #[error("internal error (correlation id {correlation_id})")]
    Internal { correlation_id: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(String),

    #[error("toml deserialize error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("toml serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl CcccError {
    /// Stable machine-readable wire code (spec §7).
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPayload { .. } => "invalid_payload",
            Self::UnknownOp { .. } => "unknown_op",
            Self::UnknownRecipient { .. } => "unknown_recipient",
            Self::NoSuchGroup { .. } => "no_such_group",
            Self::NoSuchActor { .. } => "no_such_actor",
            Self::ScopeAlreadyAttached { .. } => "scope_already_attached",
            Self::VersionConflict { .. } => "version_conflict",
            Self::Unauthorized => "unauthorized",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::GroupStopped => "group_stopped",
            Self::ActorNotRunning { .. } => "actor_not_running",
            Self::ActorAlreadyRunning { .. } => "actor_already_running",
            Self::ForemanRequired { .. } => "foreman_required",
            Self::Io(_) => "io_error",
            Self::Timeout => "timeout",
            Self::Lagged => "lagged",
            Self::Internal { .. } | Self::Json(_) | Self::Yaml(_) | Self::TomlDe(_) | Self::TomlSer(_) => {
                "internal_error"
            }
        }
    }

    /// Structured `details` payload for the IPC error envelope.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::NoSuchGroup { group_id } => Some(serde_json::json!({ "group_id": group_id })),
            Self::NoSuchActor { group_id, actor_id } => {
                Some(serde_json::json!({ "group_id": group_id, "actor_id": actor_id }))
            }
            Self::VersionConflict { expected, found } => {
                Some(serde_json::json!({ "expected": expected, "found": found }))
            }
            Self::PermissionDenied { principal, action } => {
                Some(serde_json::json!({ "principal": principal, "action": action }))
            }
            Self::Internal { correlation_id } => {
                Some(serde_json::json!({ "correlation_id": correlation_id }))
            }
            _ => None,
        }
    }

    /// Build an `internal_error` with a fresh correlation id. Never exposes
    /// the underlying panic payload or stack trace over IPC.
    pub fn internal(context: impl std::fmt::Display) -> Self {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        tracing::error!(%correlation_id, %context, "internal error");
        Self::Internal { correlation_id }
    }

    pub fn no_such_group(group_id: impl Into<String>) -> Self {
        Self::NoSuchGroup { group_id: group_id.into() }
    }

    pub fn no_such_actor(group_id: impl Into<String>, actor_id: impl Into<String>) -> Self {
        Self::NoSuchActor { group_id: group_id.into(), actor_id: actor_id.into() }
    }

    pub fn permission_denied(principal: impl Into<String>, action: impl Into<String>) -> Self {
        Self::PermissionDenied { principal: principal.into(), action: action.into() }
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload { message: message.into() }
    }
}

impl From<serde_yml::Error> for CcccError {
    fn from(err: serde_yml::Error) -> Self {
        Self::Yaml(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CcccError>;

/// Extension trait mirroring common "not found" conversions at system
/// boundaries (file lookups, option-returning projections).
pub trait OptionExt<T> {
    fn ok_or_no_group(self, group_id: impl Into<String>) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_no_group(self, group_id: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| CcccError::no_such_group(group_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(CcccError::GroupStopped.code(), "group_stopped");
        assert_eq!(
            CcccError::no_such_actor("g1", "a1").code(),
            "no_such_actor"
        );
        assert_eq!(
            CcccError::permission_denied("peer", "actor_stop").code(),
            "permission_denied"
        );
    }

    #[test]
    fn internal_error_carries_correlation_id_not_message() {
        let err = CcccError::internal("panic: index out of bounds");
        match err {
            CcccError::Internal { correlation_id } => assert!(!correlation_id.is_empty()),
            _ => panic!("expected Internal variant"),
        }
    }
}
