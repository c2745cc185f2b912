//! In-process store backing all four persistence traits behind a handful of
//! mutex-guarded maps. Suitable as the default store for a single control
//! plane instance; a clustered deployment would swap this for a real
//! database behind the same traits.

use super::{
    AgentStore, DeploymentStore, DocumentStore, RegistrationTokenRecord, RegistrationTokenStore,
    StoreError, TicketStore,
};
use crate::model::{
    Agent, AgentDeploymentStatus, AgentId, ConfigRequestTicket, ConfigurationDocument, Deployment,
    DeploymentId, DeploymentState, DocumentId, OrganizationId, TicketId,
};
use flowgate_wire::InstanceUid;
use std::collections::HashMap;
use std::sync::Mutex;
use ulid::Ulid;

#[derive(Default)]
pub struct InMemoryStore {
    agents: Mutex<HashMap<AgentId, Agent>>,
    agents_by_instance_uid: Mutex<HashMap<InstanceUid, AgentId>>,
    deployments: Mutex<HashMap<DeploymentId, Deployment>>,
    statuses: Mutex<HashMap<(DeploymentId, AgentId), AgentDeploymentStatus>>,
    documents: Mutex<HashMap<DocumentId, ConfigurationDocument>>,
    tickets: Mutex<HashMap<TicketId, ConfigRequestTicket>>,
    registration_tokens: Mutex<HashMap<Ulid, RegistrationTokenRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AgentStore for InMemoryStore {
    fn insert(&self, agent: Agent) -> Result<(), StoreError> {
        let mut agents = self.agents.lock().expect("store poisoned");
        let mut by_uid = self.agents_by_instance_uid.lock().expect("store poisoned");

        if agents.contains_key(&agent.agent_id) || by_uid.contains_key(&agent.instance_uid) {
            return Err(StoreError::Conflict);
        }
        by_uid.insert(agent.instance_uid, agent.agent_id);
        agents.insert(agent.agent_id, agent);
        Ok(())
    }

    fn get(&self, agent_id: AgentId) -> Result<Agent, StoreError> {
        self.agents
            .lock()
            .expect("store poisoned")
            .get(&agent_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(agent_id.to_string()))
    }

    fn find_by_instance_uid(
        &self,
        organization_id: &OrganizationId,
        instance_uid: &InstanceUid,
    ) -> Result<Option<Agent>, StoreError> {
        let by_uid = self.agents_by_instance_uid.lock().expect("store poisoned");
        let Some(agent_id) = by_uid.get(instance_uid) else {
            return Ok(None);
        };
        let agents = self.agents.lock().expect("store poisoned");
        Ok(agents
            .get(agent_id)
            .filter(|agent| &agent.organization_id == organization_id)
            .cloned())
    }

    fn list_active(&self, organization_id: &OrganizationId) -> Result<Vec<Agent>, StoreError> {
        Ok(self
            .agents
            .lock()
            .expect("store poisoned")
            .values()
            .filter(|agent| {
                &agent.organization_id == organization_id
                    && agent.registration_state != crate::model::RegistrationState::Inactive
            })
            .cloned()
            .collect())
    }

    fn compare_and_swap(
        &self,
        agent_id: AgentId,
        expected_version: u64,
        mut updated: Agent,
    ) -> Result<(), StoreError> {
        let mut agents = self.agents.lock().expect("store poisoned");
        let current = agents
            .get(&agent_id)
            .ok_or_else(|| StoreError::NotFound(agent_id.to_string()))?;
        if current.version != expected_version {
            return Err(StoreError::Conflict);
        }
        updated.version = expected_version + 1;
        agents.insert(agent_id, updated);
        Ok(())
    }
}

impl DeploymentStore for InMemoryStore {
    fn insert_with_statuses(
        &self,
        deployment: Deployment,
        statuses: Vec<AgentDeploymentStatus>,
    ) -> Result<(), StoreError> {
        let mut deployments = self.deployments.lock().expect("store poisoned");
        let mut store_statuses = self.statuses.lock().expect("store poisoned");

        if deployments.contains_key(&deployment.deployment_id) {
            return Err(StoreError::Conflict);
        }
        let deployment_id = deployment.deployment_id;
        deployments.insert(deployment_id, deployment);
        for status in statuses {
            store_statuses.insert((deployment_id, status.agent_id), status);
        }
        Ok(())
    }

    fn get(&self, deployment_id: DeploymentId) -> Result<Deployment, StoreError> {
        self.deployments
            .lock()
            .expect("store poisoned")
            .get(&deployment_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(deployment_id.to_string()))
    }

    fn update(&self, deployment: Deployment) -> Result<(), StoreError> {
        let mut deployments = self.deployments.lock().expect("store poisoned");
        if !deployments.contains_key(&deployment.deployment_id) {
            return Err(StoreError::NotFound(deployment.deployment_id.to_string()));
        }
        deployments.insert(deployment.deployment_id, deployment);
        Ok(())
    }

    fn list_non_terminal(&self, organization_id: &OrganizationId) -> Result<Vec<Deployment>, StoreError> {
        Ok(self
            .deployments
            .lock()
            .expect("store poisoned")
            .values()
            .filter(|d| &d.organization_id == organization_id && !d.state.is_terminal())
            .cloned()
            .collect())
    }

    fn get_status(
        &self,
        deployment_id: DeploymentId,
        agent_id: AgentId,
    ) -> Result<AgentDeploymentStatus, StoreError> {
        self.statuses
            .lock()
            .expect("store poisoned")
            .get(&(deployment_id, agent_id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("{deployment_id}/{agent_id}")))
    }

    fn update_status(&self, status: AgentDeploymentStatus) -> Result<(), StoreError> {
        self.statuses
            .lock()
            .expect("store poisoned")
            .insert((status.deployment_id, status.agent_id), status);
        Ok(())
    }

    fn list_statuses(&self, deployment_id: DeploymentId) -> Result<Vec<AgentDeploymentStatus>, StoreError> {
        Ok(self
            .statuses
            .lock()
            .expect("store poisoned")
            .values()
            .filter(|s| s.deployment_id == deployment_id)
            .cloned()
            .collect())
    }

    fn active_status_for_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<Option<AgentDeploymentStatus>, StoreError> {
        let deployments = self.deployments.lock().expect("store poisoned");
        let statuses = self.statuses.lock().expect("store poisoned");

        let mut candidates: Vec<&AgentDeploymentStatus> = statuses
            .values()
            .filter(|status| status.agent_id == agent_id)
            .filter(|status| {
                deployments
                    .get(&status.deployment_id)
                    .map(|d| d.state != DeploymentState::RolledBack)
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort_by_key(|status| status.updated_at);
        Ok(candidates.last().map(|status| (*status).clone()))
    }
}

impl DocumentStore for InMemoryStore {
    fn put(&self, document: ConfigurationDocument) -> Result<(), StoreError> {
        self.documents
            .lock()
            .expect("store poisoned")
            .insert(document.doc_id, document);
        Ok(())
    }

    fn get(&self, doc_id: DocumentId) -> Result<ConfigurationDocument, StoreError> {
        self.documents
            .lock()
            .expect("store poisoned")
            .get(&doc_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(doc_id.to_string()))
    }

    fn get_by_hash(
        &self,
        organization_id: &OrganizationId,
        hash: &[u8],
    ) -> Result<Option<ConfigurationDocument>, StoreError> {
        Ok(self
            .documents
            .lock()
            .expect("store poisoned")
            .values()
            .find(|doc| &doc.organization_id == organization_id && doc.hash == hash)
            .cloned())
    }
}

impl TicketStore for InMemoryStore {
    fn insert(&self, ticket: ConfigRequestTicket) -> Result<(), StoreError> {
        self.tickets
            .lock()
            .expect("store poisoned")
            .insert(ticket.ticket_id, ticket);
        Ok(())
    }

    fn get(&self, ticket_id: TicketId) -> Result<ConfigRequestTicket, StoreError> {
        self.tickets
            .lock()
            .expect("store poisoned")
            .get(&ticket_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(ticket_id.to_string()))
    }

    fn open_for_agent(&self, agent_id: AgentId) -> Result<Option<ConfigRequestTicket>, StoreError> {
        Ok(self
            .tickets
            .lock()
            .expect("store poisoned")
            .values()
            .find(|t| t.agent_id == agent_id && t.state == crate::model::TicketState::Pending)
            .cloned())
    }

    fn update(&self, ticket: ConfigRequestTicket) -> Result<(), StoreError> {
        let mut tickets = self.tickets.lock().expect("store poisoned");
        if !tickets.contains_key(&ticket.ticket_id) {
            return Err(StoreError::NotFound(ticket.ticket_id.to_string()));
        }
        tickets.insert(ticket.ticket_id, ticket);
        Ok(())
    }
}

impl RegistrationTokenStore for InMemoryStore {
    fn insert(&self, record: RegistrationTokenRecord) -> Result<(), StoreError> {
        self.registration_tokens
            .lock()
            .expect("store poisoned")
            .insert(record.token_id, record);
        Ok(())
    }

    fn get(&self, token_id: Ulid) -> Result<RegistrationTokenRecord, StoreError> {
        self.registration_tokens
            .lock()
            .expect("store poisoned")
            .get(&token_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(token_id.to_string()))
    }

    fn mark_consumed(&self, token_id: Ulid) -> Result<(), StoreError> {
        let mut tokens = self.registration_tokens.lock().expect("store poisoned");
        let record = tokens
            .get_mut(&token_id)
            .ok_or_else(|| StoreError::NotFound(token_id.to_string()))?;
        record.consumed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentHealth, ManagementMode, RegistrationState, RemoteConfigStatus};
    use std::collections::HashMap as Map;
    use std::time::SystemTime;

    fn sample_agent(organization_id: &str, instance_uid: u8) -> Agent {
        Agent {
            agent_id: AgentId::new(),
            instance_uid: InstanceUid::from_bytes(&[instance_uid; 16]).unwrap(),
            organization_id: OrganizationId::new(organization_id),
            name: "collector-1".into(),
            identifying_attributes: Map::new(),
            management_mode: ManagementMode::Supervisor,
            agent_capabilities: 0x1FFF,
            server_capabilities: 0,
            last_seen: SystemTime::now(),
            last_sequence_num: 0,
            effective_config_hash: Vec::new(),
            remote_config_hash: Vec::new(),
            remote_config_status: RemoteConfigStatus::Unset,
            remote_config_error: None,
            health: AgentHealth::default(),
            registration_state: RegistrationState::Registered,
            version: 0,
        }
    }

    #[test]
    fn cas_fails_on_stale_version() {
        let store = InMemoryStore::new();
        let agent = sample_agent("org-1", 1);
        let agent_id = agent.agent_id;
        AgentStore::insert(&store, agent.clone()).unwrap();

        let mut updated = agent.clone();
        updated.last_sequence_num = 1;
        store.compare_and_swap(agent_id, 0, updated.clone()).unwrap();

        let err = store.compare_and_swap(agent_id, 0, updated).unwrap_err();
        assert_eq!(err, StoreError::Conflict);
    }

    #[test]
    fn insert_rejects_duplicate_instance_uid() {
        let store = InMemoryStore::new();
        let mut a = sample_agent("org-1", 7);
        let b = sample_agent("org-1", 7);
        a.agent_id = AgentId::new();
        AgentStore::insert(&store, a).unwrap();
        assert_eq!(AgentStore::insert(&store, b).unwrap_err(), StoreError::Conflict);
    }

    #[test]
    fn find_by_instance_uid_is_organization_scoped() {
        let store = InMemoryStore::new();
        let agent = sample_agent("org-1", 9);
        let uid = agent.instance_uid;
        AgentStore::insert(&store, agent).unwrap();

        assert!(store
            .find_by_instance_uid(&OrganizationId::new("org-2"), &uid)
            .unwrap()
            .is_none());
        assert!(store
            .find_by_instance_uid(&OrganizationId::new("org-1"), &uid)
            .unwrap()
            .is_some());
    }
}
