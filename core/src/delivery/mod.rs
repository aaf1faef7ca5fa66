//! Delivery pipeline: addressee resolution, throttled PTY injection,
//! built-in nudges, and user-defined automation (spec §4.4).

pub mod automation;
pub mod engine;
pub mod nudges;

pub use automation::{AutomationEngine, FiredEffect};
pub use engine::DeliveryEngine;
pub use nudges::{ActorNudgeInput, GroupNudgeInput, NudgeEngine, NudgeReason, PendingNudge};
