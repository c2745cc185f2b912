//! Agent Registry: authoritative per-agent state and the
//! persistence interface around it.

mod delta;
mod error;

pub use delta::RegistryDelta;
pub use error::RegistryError;

use crate::capability::resolve_capabilities;
use crate::model::{
    Agent, AgentHealth, AgentId, ManagementMode, OrganizationId, RegistrationState,
    RemoteConfigStatus, TicketState,
};
use crate::persistence::{AgentStore, StoreError, TicketStore};
use flowgate_wire::codec::{AgentToServer, RemoteConfigApplyStatus};
use flowgate_wire::InstanceUid;
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::{debug, warn};

const MAX_CAS_ATTEMPTS: u32 = 5;

/// What the caller (typically the Token Service or transport layer, after
/// it has already verified a registration token) declares about an agent
/// connecting for the first time.
#[derive(Debug, Clone)]
pub struct DeclaredIdentity {
    pub name: String,
    pub identifying_attributes: HashMap<String, String>,
    pub management_mode: ManagementMode,
}

pub struct AgentRegistry<A, T> {
    agents: A,
    tickets: T,
}

impl<A, T> AgentRegistry<A, T>
where
    A: AgentStore,
    T: TicketStore,
{
    pub fn new(agents: A, tickets: T) -> Self {
        Self { agents, tickets }
    }

    /// Creates the row if `instance_uid` is new for this organization;
    /// otherwise returns the existing agent unchanged (a supervisor
    /// reconnecting after a restart re-registers with the same identity).
    pub fn register(
        &self,
        organization_id: OrganizationId,
        instance_uid: InstanceUid,
        declared: DeclaredIdentity,
        now: SystemTime,
    ) -> Result<Agent, RegistryError> {
        if let Some(existing) = self
            .agents
            .find_by_instance_uid(&organization_id, &instance_uid)?
        {
            return Ok(existing);
        }

        let agent = Agent {
            agent_id: AgentId::new(),
            instance_uid,
            organization_id,
            name: declared.name,
            identifying_attributes: declared.identifying_attributes,
            management_mode: declared.management_mode,
            agent_capabilities: 0,
            server_capabilities: crate::capability::SERVER_CAPABILITIES,
            last_seen: now,
            last_sequence_num: 0,
            effective_config_hash: Vec::new(),
            remote_config_hash: Vec::new(),
            remote_config_status: RemoteConfigStatus::Unset,
            remote_config_error: None,
            health: AgentHealth::default(),
            registration_state: RegistrationState::Registered,
            version: 0,
        };

        match self.agents.insert(agent.clone()) {
            Ok(()) => Ok(agent),
            Err(StoreError::Conflict) => self
                .agents
                .find_by_instance_uid(&agent.organization_id, &agent.instance_uid)?
                .ok_or(RegistryError::AlreadyRegistered),
            Err(other) => Err(other.into()),
        }
    }

    pub fn lookup(&self, agent_id: AgentId) -> Result<Agent, RegistryError> {
        Ok(self.agents.get(agent_id)?)
    }

    pub fn lookup_by_instance_uid(
        &self,
        organization_id: &OrganizationId,
        instance_uid: &InstanceUid,
    ) -> Result<Agent, RegistryError> {
        self.agents
            .find_by_instance_uid(organization_id, instance_uid)?
            .ok_or(RegistryError::NotFound)
    }

    pub fn list_active(&self, organization_id: &OrganizationId) -> Result<Vec<Agent>, RegistryError> {
        Ok(self.agents.list_active(organization_id)?)
    }

    /// Whether a [`crate::model::ConfigRequestTicket`] is still awaiting this
    /// agent's next `effective_config` report.
    pub fn has_pending_ticket(&self, agent_id: AgentId) -> Result<bool, RegistryError> {
        Ok(self.tickets.open_for_agent(agent_id)?.is_some())
    }

    /// Merges one inbound `AgentToServer` into the stored record. Retries
    /// the compare-and-swap a bounded number of times on a concurrent write
    /// before giving up with [`RegistryError::Conflict`].
    pub fn apply_inbound(
        &self,
        agent_id: AgentId,
        message: &AgentToServer,
        now: SystemTime,
    ) -> Result<RegistryDelta, RegistryError> {
        for attempt in 0..MAX_CAS_ATTEMPTS {
            let current = self.agents.get(agent_id)?;
            let expected_version = current.version;

            if message.sequence_num <= current.last_sequence_num && current.last_sequence_num > 0
            {
                let mut replayed = current.clone();
                replayed.last_seen = now;
                match self.agents.compare_and_swap(agent_id, expected_version, replayed) {
                    Ok(()) => return Ok(RegistryDelta::replay()),
                    Err(StoreError::Conflict) => continue,
                    Err(other) => return Err(other.into()),
                }
            }

            let (mutated, delta) = self.merge(current, message, now)?;

            match self.agents.compare_and_swap(agent_id, expected_version, mutated) {
                Ok(()) => return Ok(delta),
                Err(StoreError::Conflict) => {
                    debug!(attempt, %agent_id, "registry CAS conflict, retrying");
                    continue;
                }
                Err(other) => return Err(other.into()),
            }
        }

        Err(RegistryError::Conflict {
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    fn merge(
        &self,
        mut agent: Agent,
        message: &AgentToServer,
        now: SystemTime,
    ) -> Result<(Agent, RegistryDelta), RegistryError> {
        let mut delta = RegistryDelta::default();
        agent.last_seen = now;
        agent.last_sequence_num = message.sequence_num;

        let resolved_capabilities = resolve_capabilities(agent.management_mode, message.capabilities);
        if resolved_capabilities != agent.agent_capabilities {
            agent.agent_capabilities = resolved_capabilities;
            delta.capabilities_changed = true;
        }

        if let Some(effective_config) = &message.effective_config {
            agent.effective_config_hash = effective_config.hash.0.clone();
            delta.effective_config_updated = true;

            if let Some(mut ticket) = self.tickets.open_for_agent(agent.agent_id)? {
                ticket.state = TicketState::Completed;
                ticket.result_payload = Some(effective_config.hash.0.clone());
                self.tickets.update(ticket.clone())?;
                delta.resolved_ticket = Some(ticket.ticket_id);
            }
        }

        if let Some(report) = &message.remote_config_status {
            let reported = map_apply_status(report.status);
            if allowed_transition(agent.remote_config_status, reported) {
                agent.remote_config_status = reported;
                agent.remote_config_error = if report.error_message.is_empty() {
                    None
                } else {
                    Some(report.error_message.clone())
                };
                if !report.last_remote_config_hash.is_empty() {
                    agent.remote_config_hash = report.last_remote_config_hash.0.clone();
                }

                if !agent.satisfies_applied_invariant() {
                    warn!(
                        agent_id = %agent.agent_id,
                        "agent reported Applied but effective_config_hash does not match remote_config_hash"
                    );
                    agent.remote_config_status = RemoteConfigStatus::Failed;
                    agent.remote_config_error =
                        Some("effective_config_hash does not match remote_config_hash".into());
                }

                delta.remote_config_status_changed = true;
                delta.new_remote_config_status = Some(agent.remote_config_status);
            } else {
                warn!(
                    agent_id = %agent.agent_id,
                    from = ?agent.remote_config_status,
                    to = ?reported,
                    "ignoring out-of-order remote_config_status transition"
                );
            }
        }

        if let Some(health) = &message.health {
            agent.health = AgentHealth {
                healthy: health.healthy,
                start_time_nanos: health.start_time_unix_nano,
                last_error: health.last_error.clone(),
            };
            delta.health_changed = true;
        }

        Ok((agent, delta))
    }
}

fn map_apply_status(status: RemoteConfigApplyStatus) -> RemoteConfigStatus {
    match status {
        RemoteConfigApplyStatus::Unset => RemoteConfigStatus::Unset,
        RemoteConfigApplyStatus::Applying => RemoteConfigStatus::Applying,
        RemoteConfigApplyStatus::Applied => RemoteConfigStatus::Applied,
        RemoteConfigApplyStatus::Failed => RemoteConfigStatus::Failed,
    }
}

/// Remote-config status transitions are accepted only in the direction
/// `UNSET -> APPLYING -> {APPLIED, FAILED}`, or a fresh `APPLYING` from any
/// state (a new remote-config application cycle starting over).
fn allowed_transition(from: RemoteConfigStatus, to: RemoteConfigStatus) -> bool {
    use RemoteConfigStatus::*;
    match to {
        Applying => true,
        Applied | Failed => from == Applying,
        Unset => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConfigRequestTicket, TicketId};
    use crate::persistence::memory::InMemoryStore;
    use flowgate_wire::codec::{EffectiveConfig, RemoteConfigStatusReport};
    use flowgate_wire::ConfigHash;
    use std::sync::Arc;

    fn store() -> Arc<InMemoryStore> {
        Arc::new(InMemoryStore::new())
    }

    fn registry(store: Arc<InMemoryStore>) -> AgentRegistry<Arc<InMemoryStore>, Arc<InMemoryStore>> {
        AgentRegistry::new(store.clone(), store)
    }

    fn base_message(instance_uid: InstanceUid, sequence_num: u64) -> AgentToServer {
        AgentToServer {
            instance_uid,
            sequence_num,
            capabilities: 0x1FFF,
            agent_description: None,
            effective_config: None,
            remote_config_status: None,
            health: None,
            available_components: None,
            package_statuses: Vec::new(),
        }
    }

    #[test]
    fn register_is_idempotent_for_the_same_instance_uid() {
        let backing = store();
        let reg = registry(backing);
        let org = OrganizationId::new("org-1");
        let uid = InstanceUid::from_bytes(&[3u8; 16]).unwrap();
        let declared = DeclaredIdentity {
            name: "collector".into(),
            identifying_attributes: HashMap::new(),
            management_mode: ManagementMode::Supervisor,
        };

        let first = reg
            .register(org.clone(), uid, declared.clone(), SystemTime::now())
            .unwrap();
        let second = reg
            .register(org, uid, declared, SystemTime::now())
            .unwrap();
        assert_eq!(first.agent_id, second.agent_id);
    }

    #[test]
    fn replayed_sequence_number_only_touches_last_seen() {
        let backing = store();
        let reg = registry(backing);
        let org = OrganizationId::new("org-1");
        let uid = InstanceUid::from_bytes(&[4u8; 16]).unwrap();
        let agent = reg
            .register(
                org,
                uid,
                DeclaredIdentity {
                    name: "collector".into(),
                    identifying_attributes: HashMap::new(),
                    management_mode: ManagementMode::Extension,
                },
                SystemTime::now(),
            )
            .unwrap();

        let first = base_message(uid, 5);
        reg.apply_inbound(agent.agent_id, &first, SystemTime::now())
            .unwrap();

        let replay = base_message(uid, 5);
        let delta = reg
            .apply_inbound(agent.agent_id, &replay, SystemTime::now())
            .unwrap();
        assert!(delta.replay);

        let stored = reg.lookup(agent.agent_id).unwrap();
        assert_eq!(stored.last_sequence_num, 5);
    }

    #[test]
    fn zero_capabilities_under_supervisor_are_inferred() {
        let backing = store();
        let reg = registry(backing);
        let org = OrganizationId::new("org-1");
        let uid = InstanceUid::from_bytes(&[5u8; 16]).unwrap();
        let agent = reg
            .register(
                org,
                uid,
                DeclaredIdentity {
                    name: "collector".into(),
                    identifying_attributes: HashMap::new(),
                    management_mode: ManagementMode::Supervisor,
                },
                SystemTime::now(),
            )
            .unwrap();

        let mut msg = base_message(uid, 1);
        msg.capabilities = 0;
        reg.apply_inbound(agent.agent_id, &msg, SystemTime::now())
            .unwrap();

        let stored = reg.lookup(agent.agent_id).unwrap();
        assert_eq!(stored.agent_capabilities, 0x7DE7);
    }

    #[test]
    fn effective_config_resolves_open_ticket() {
        let backing = store();
        let reg = registry(backing.clone());
        let org = OrganizationId::new("org-1");
        let uid = InstanceUid::from_bytes(&[6u8; 16]).unwrap();
        let agent = reg
            .register(
                org,
                uid,
                DeclaredIdentity {
                    name: "collector".into(),
                    identifying_attributes: HashMap::new(),
                    management_mode: ManagementMode::Extension,
                },
                SystemTime::now(),
            )
            .unwrap();

        let ticket_id = TicketId::new();
        TicketStore::insert(
            &backing,
            ConfigRequestTicket {
                ticket_id,
                agent_id: agent.agent_id,
                state: TicketState::Pending,
                created_at: SystemTime::now(),
                expires_at: SystemTime::now(),
                result_payload: None,
            },
        )
        .unwrap();

        let mut msg = base_message(uid, 1);
        msg.effective_config = Some(EffectiveConfig {
            config_map: HashMap::new(),
            hash: ConfigHash(b"H1".to_vec()),
        });
        let delta = reg
            .apply_inbound(agent.agent_id, &msg, SystemTime::now())
            .unwrap();
        assert_eq!(delta.resolved_ticket, Some(ticket_id));

        let ticket = TicketStore::get(&backing, ticket_id).unwrap();
        assert_eq!(ticket.state, TicketState::Completed);
    }

    #[test]
    fn out_of_order_remote_config_status_is_ignored() {
        let backing = store();
        let reg = registry(backing);
        let org = OrganizationId::new("org-1");
        let uid = InstanceUid::from_bytes(&[7u8; 16]).unwrap();
        let agent = reg
            .register(
                org,
                uid,
                DeclaredIdentity {
                    name: "collector".into(),
                    identifying_attributes: HashMap::new(),
                    management_mode: ManagementMode::Extension,
                },
                SystemTime::now(),
            )
            .unwrap();

        let mut msg = base_message(uid, 1);
        msg.remote_config_status = Some(RemoteConfigStatusReport {
            status: RemoteConfigApplyStatus::Applied,
            last_remote_config_hash: ConfigHash(b"H".to_vec()),
            error_message: String::new(),
        });
        reg.apply_inbound(agent.agent_id, &msg, SystemTime::now())
            .unwrap();

        let stored = reg.lookup(agent.agent_id).unwrap();
        assert_eq!(stored.remote_config_status, RemoteConfigStatus::Unset);
    }
}
