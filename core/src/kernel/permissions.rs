//! Permission matrix (principal × action), spec §4.2.
//!
//! Grounded on the teacher's `agent/permissions.rs` shape (an explicit
//! check function returning a typed error rather than a boolean), adapted
//! from tool/command allow-lists to the group-level action matrix.

use crate::error::{CcccError, Result};

/// The acting identity of a request. `PeerSelf`/`PeerOther` distinguish a
/// peer acting on its own actor record from acting on someone else's —
/// the matrix only allows the former.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    User,
    Foreman,
    PeerSelf,
    PeerOther,
}

impl Principal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Foreman => "foreman",
            Self::PeerSelf => "peer (self)",
            Self::PeerOther => "peer (other)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    ActorAdd,
    ActorStart,
    ActorStop,
    ActorRestart,
    ActorRemove,
    ActorPoll,
    GroupStart,
    GroupStop,
    GroupSetState,
    GroupSettingsUpdate,
    GroupAutomationUpdate,
    GroupDelete,
    GroupImportBlueprint,
    LedgerCompact,
    MessageSend,
    MessageAck,
    InboxMarkRead,
    ContextUpdate,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ActorAdd => "actor_add",
            Self::ActorStart => "actor_start",
            Self::ActorStop => "actor_stop",
            Self::ActorRestart => "actor_restart",
            Self::ActorRemove => "actor_remove",
            Self::ActorPoll => "actor_poll",
            Self::GroupStart => "group_start",
            Self::GroupStop => "group_stop",
            Self::GroupSetState => "group_set_state",
            Self::GroupSettingsUpdate => "group_settings_update",
            Self::GroupAutomationUpdate => "group_automation_update",
            Self::GroupDelete => "group_delete",
            Self::GroupImportBlueprint => "group_import_blueprint",
            Self::LedgerCompact => "ledger_compact",
            Self::MessageSend => "message_send",
            Self::MessageAck => "message_ack",
            Self::InboxMarkRead => "inbox_mark_read",
            Self::ContextUpdate => "context_update",
        }
    }

    /// Peer-actor lifecycle actions a peer may take on itself. A headless
    /// actor reporting its own liveness (`actor.poll`) is the same
    /// "self" concern as stopping/restarting/removing itself.
    fn is_self_actor_lifecycle(&self) -> bool {
        matches!(self, Self::ActorStop | Self::ActorRestart | Self::ActorRemove | Self::ActorPoll)
    }

    /// Settings/automation changes restricted to `user|foreman`.
    fn is_settings_or_automation(&self) -> bool {
        matches!(
            self,
            Self::GroupSettingsUpdate | Self::GroupAutomationUpdate | Self::GroupImportBlueprint | Self::LedgerCompact
        )
    }
}

/// `users may do anything; foreman may do anything a user may do except
/// delete the group; a peer may only act on itself (stop/restart/remove
/// self) and send/ack/reply messages` (spec §4.2).
pub fn check(principal: Principal, action: Action) -> Result<()> {
    let allowed = match principal {
        Principal::User => true,
        Principal::Foreman => action != Action::GroupDelete,
        Principal::PeerSelf => {
            action.is_self_actor_lifecycle()
                || matches!(action, Action::MessageSend | Action::MessageAck | Action::InboxMarkRead)
        }
        Principal::PeerOther => {
            matches!(action, Action::MessageSend | Action::MessageAck | Action::InboxMarkRead)
        }
    };

    if !allowed {
        return Err(CcccError::permission_denied(principal.as_str(), action.as_str()));
    }

    if action.is_settings_or_automation() && !matches!(principal, Principal::User | Principal::Foreman) {
        return Err(CcccError::permission_denied(principal.as_str(), action.as_str()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_may_do_anything() {
        assert!(check(Principal::User, Action::GroupDelete).is_ok());
        assert!(check(Principal::User, Action::GroupAutomationUpdate).is_ok());
    }

    #[test]
    fn foreman_may_not_delete_group() {
        assert!(check(Principal::Foreman, Action::GroupDelete).is_err());
        assert!(check(Principal::Foreman, Action::GroupSettingsUpdate).is_ok());
    }

    #[test]
    fn peer_may_only_act_on_self() {
        assert!(check(Principal::PeerSelf, Action::ActorStop).is_ok());
        assert!(check(Principal::PeerOther, Action::ActorStop).is_err());
        assert!(check(Principal::PeerSelf, Action::ActorAdd).is_err());
    }

    #[test]
    fn peers_may_send_and_ack_messages() {
        assert!(check(Principal::PeerOther, Action::MessageSend).is_ok());
        assert!(check(Principal::PeerOther, Action::MessageAck).is_ok());
    }

    #[test]
    fn settings_and_automation_are_user_or_foreman_only() {
        assert!(check(Principal::PeerSelf, Action::GroupSettingsUpdate).is_err());
        assert!(check(Principal::PeerSelf, Action::GroupAutomationUpdate).is_err());
    }

    #[test]
    fn denial_carries_principal_and_action() {
        let err = check(Principal::PeerOther, Action::ActorStop).unwrap_err();
        assert_eq!(err.code(), "permission_denied");
    }
}
