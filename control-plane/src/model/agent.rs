use super::ids::{AgentId, OrganizationId};
use flowgate_wire::InstanceUid;
use std::collections::HashMap;
use std::time::SystemTime;

/// Whether the reporting process owns OpAMP directly or delegates to a
/// supervisor that owns it on the collector's behalf (GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagementMode {
    Supervisor,
    Extension,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteConfigStatus {
    Unset,
    Applying,
    Applied,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentHealth {
    pub healthy: bool,
    pub start_time_nanos: u64,
    pub last_error: String,
}

impl Default for AgentHealth {
    fn default() -> Self {
        Self {
            healthy: false,
            start_time_nanos: 0,
            last_error: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Registered,
    Active,
    Inactive,
    Error,
}

/// Authoritative per-agent state.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    pub agent_id: AgentId,
    pub instance_uid: InstanceUid,
    pub organization_id: OrganizationId,
    pub name: String,
    pub identifying_attributes: HashMap<String, String>,
    pub management_mode: ManagementMode,
    pub agent_capabilities: u64,
    pub server_capabilities: u64,
    pub last_seen: SystemTime,
    pub last_sequence_num: u64,
    pub effective_config_hash: Vec<u8>,
    pub remote_config_hash: Vec<u8>,
    pub remote_config_status: RemoteConfigStatus,
    pub remote_config_error: Option<String>,
    pub health: AgentHealth,
    pub registration_state: RegistrationState,
    /// Opaque optimistic-concurrency counter, bumped on every persisted
    /// update. Not part of the domain model proper; exists so the registry
    /// can do compare-and-swap writes against the store.
    pub version: u64,
}

impl Agent {
    /// Once applied, the effective and remote config hashes must agree.
    pub fn satisfies_applied_invariant(&self) -> bool {
        self.remote_config_status != RemoteConfigStatus::Applied
            || self.effective_config_hash == self.remote_config_hash
    }
}
