//! Versioned, validated data shapes shared by every component. No behavior
//! lives here — just the types the ledger stores, the kernel projects, and
//! the IPC surface marshals.

pub mod actor;
pub mod automation;
pub mod blob;
pub mod event;
pub mod group;
pub mod message;
pub mod notify;

pub use actor::{Actor, ActorProfile, ActorRole, RunnerKind, RuntimeKind};
pub use automation::{ActorControlOp, AutomationRule, AutomationRuleset, RuleAction, Trigger};
pub use blob::BlobRef;
pub use event::{Event, EventKind};
pub use group::{Group, GroupState, Scope};
pub use message::{ChatMessage, MessageFormat, Priority, Recipient};
pub use notify::SystemNotify;
