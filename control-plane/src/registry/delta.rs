use crate::model::{RemoteConfigStatus, TicketId};

/// What changed as a result of one `apply_inbound` call. The
/// Reconciliation Loop reads this to decide what, if anything, to enqueue
/// for the agent — it never re-derives "did something change" by diffing
/// the whole `Agent` record itself.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistryDelta {
    /// The inbound message repeated a `sequence_num` already seen; nothing
    /// but `last_seen` was touched.
    pub replay: bool,
    pub capabilities_changed: bool,
    pub effective_config_updated: bool,
    pub remote_config_status_changed: bool,
    pub resolved_remote_config: bool,
    pub health_changed: bool,
    pub resolved_ticket: Option<TicketId>,
    pub new_remote_config_status: Option<RemoteConfigStatus>,
}

impl RegistryDelta {
    pub fn replay() -> Self {
        Self {
            replay: true,
            ..Self::default()
        }
    }
}
