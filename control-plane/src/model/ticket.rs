use super::ids::{AgentId, TicketId};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketState {
    Pending,
    Completed,
    Failed,
    Expired,
}

/// Tracks a Control API request for an agent to re-report its effective
/// config. Resolved by the next inbound
/// message that carries `effective_config`, or by expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigRequestTicket {
    pub ticket_id: TicketId,
    pub agent_id: AgentId,
    pub state: TicketState,
    pub created_at: SystemTime,
    pub expires_at: SystemTime,
    pub result_payload: Option<Vec<u8>>,
}
