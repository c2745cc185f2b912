//! Persistence contract: upsert-with-CAS keyed by `agent_id`,
//! transactional deployment+status insert, secondary lookups by
//! `instance_uid` and `(organization_id, tag_predicate)`, and an immutable
//! content-addressed blob store for configuration documents. Traits here are
//! the seam; [`memory`] provides the one backing implementation this crate
//! ships.

mod error;
pub mod memory;

pub use error::StoreError;

use crate::model::{
    Agent, AgentDeploymentStatus, AgentId, ConfigRequestTicket, ConfigurationDocument,
    Deployment, DeploymentId, DocumentId, OrganizationId, TicketId,
};
use flowgate_token::registration_token::RegistrationTokenDigest;
use flowgate_wire::InstanceUid;
use std::sync::Arc;
use std::time::SystemTime;
use ulid::Ulid;

/// A stored, not-yet-or-already-consumed registration token. The plain value is never kept — only its salted digest.
#[derive(Debug, Clone)]
pub struct RegistrationTokenRecord {
    pub token_id: Ulid,
    pub organization_id: OrganizationId,
    pub digest: RegistrationTokenDigest,
    pub created_at: SystemTime,
    pub expires_at: SystemTime,
    pub consumed: bool,
}

#[cfg_attr(test, mockall::automock)]
pub trait AgentStore: Send + Sync {
    fn insert(&self, agent: Agent) -> Result<(), StoreError>;
    fn get(&self, agent_id: AgentId) -> Result<Agent, StoreError>;
    fn find_by_instance_uid(
        &self,
        organization_id: &OrganizationId,
        instance_uid: &InstanceUid,
    ) -> Result<Option<Agent>, StoreError>;
    fn list_active(&self, organization_id: &OrganizationId) -> Result<Vec<Agent>, StoreError>;
    fn compare_and_swap(
        &self,
        agent_id: AgentId,
        expected_version: u64,
        updated: Agent,
    ) -> Result<(), StoreError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait DeploymentStore: Send + Sync {
    fn insert_with_statuses(
        &self,
        deployment: Deployment,
        statuses: Vec<AgentDeploymentStatus>,
    ) -> Result<(), StoreError>;
    fn get(&self, deployment_id: DeploymentId) -> Result<Deployment, StoreError>;
    fn update(&self, deployment: Deployment) -> Result<(), StoreError>;
    fn list_non_terminal(&self, organization_id: &OrganizationId) -> Result<Vec<Deployment>, StoreError>;
    fn get_status(
        &self,
        deployment_id: DeploymentId,
        agent_id: AgentId,
    ) -> Result<AgentDeploymentStatus, StoreError>;
    fn update_status(&self, status: AgentDeploymentStatus) -> Result<(), StoreError>;
    fn list_statuses(&self, deployment_id: DeploymentId) -> Result<Vec<AgentDeploymentStatus>, StoreError>;
    fn active_status_for_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<Option<AgentDeploymentStatus>, StoreError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait DocumentStore: Send + Sync {
    fn put(&self, document: ConfigurationDocument) -> Result<(), StoreError>;
    fn get(&self, doc_id: DocumentId) -> Result<ConfigurationDocument, StoreError>;
    fn get_by_hash(
        &self,
        organization_id: &OrganizationId,
        hash: &[u8],
    ) -> Result<Option<ConfigurationDocument>, StoreError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait TicketStore: Send + Sync {
    fn insert(&self, ticket: ConfigRequestTicket) -> Result<(), StoreError>;
    fn get(&self, ticket_id: TicketId) -> Result<ConfigRequestTicket, StoreError>;
    fn open_for_agent(&self, agent_id: AgentId) -> Result<Option<ConfigRequestTicket>, StoreError>;
    fn update(&self, ticket: ConfigRequestTicket) -> Result<(), StoreError>;
}

#[cfg_attr(test, mockall::automock)]
pub trait RegistrationTokenStore: Send + Sync {
    fn insert(&self, record: RegistrationTokenRecord) -> Result<(), StoreError>;
    fn get(&self, token_id: Ulid) -> Result<RegistrationTokenRecord, StoreError>;
    fn mark_consumed(&self, token_id: Ulid) -> Result<(), StoreError>;
}

/// Lets every store trait be shared across components by cloning an `Arc`
/// rather than trait-object dispatch.
macro_rules! forward_to_arc {
    ($trait:ident { $(fn $method:ident(&self $(, $arg:ident: $arg_ty:ty)*) -> $ret:ty;)+ }) => {
        impl<S: $trait + ?Sized> $trait for Arc<S> {
            $(
                fn $method(&self $(, $arg: $arg_ty)*) -> $ret {
                    (**self).$method($($arg),*)
                }
            )+
        }
    };
}

forward_to_arc!(AgentStore {
    fn insert(&self, agent: Agent) -> Result<(), StoreError>;
    fn get(&self, agent_id: AgentId) -> Result<Agent, StoreError>;
    fn find_by_instance_uid(&self, organization_id: &OrganizationId, instance_uid: &InstanceUid) -> Result<Option<Agent>, StoreError>;
    fn list_active(&self, organization_id: &OrganizationId) -> Result<Vec<Agent>, StoreError>;
    fn compare_and_swap(&self, agent_id: AgentId, expected_version: u64, updated: Agent) -> Result<(), StoreError>;
});

forward_to_arc!(DeploymentStore {
    fn insert_with_statuses(&self, deployment: Deployment, statuses: Vec<AgentDeploymentStatus>) -> Result<(), StoreError>;
    fn get(&self, deployment_id: DeploymentId) -> Result<Deployment, StoreError>;
    fn update(&self, deployment: Deployment) -> Result<(), StoreError>;
    fn list_non_terminal(&self, organization_id: &OrganizationId) -> Result<Vec<Deployment>, StoreError>;
    fn get_status(&self, deployment_id: DeploymentId, agent_id: AgentId) -> Result<AgentDeploymentStatus, StoreError>;
    fn update_status(&self, status: AgentDeploymentStatus) -> Result<(), StoreError>;
    fn list_statuses(&self, deployment_id: DeploymentId) -> Result<Vec<AgentDeploymentStatus>, StoreError>;
    fn active_status_for_agent(&self, agent_id: AgentId) -> Result<Option<AgentDeploymentStatus>, StoreError>;
});

forward_to_arc!(DocumentStore {
    fn put(&self, document: ConfigurationDocument) -> Result<(), StoreError>;
    fn get(&self, doc_id: DocumentId) -> Result<ConfigurationDocument, StoreError>;
    fn get_by_hash(&self, organization_id: &OrganizationId, hash: &[u8]) -> Result<Option<ConfigurationDocument>, StoreError>;
});

forward_to_arc!(TicketStore {
    fn insert(&self, ticket: ConfigRequestTicket) -> Result<(), StoreError>;
    fn get(&self, ticket_id: TicketId) -> Result<ConfigRequestTicket, StoreError>;
    fn open_for_agent(&self, agent_id: AgentId) -> Result<Option<ConfigRequestTicket>, StoreError>;
    fn update(&self, ticket: ConfigRequestTicket) -> Result<(), StoreError>;
});

forward_to_arc!(RegistrationTokenStore {
    fn insert(&self, record: RegistrationTokenRecord) -> Result<(), StoreError>;
    fn get(&self, token_id: Ulid) -> Result<RegistrationTokenRecord, StoreError>;
    fn mark_consumed(&self, token_id: Ulid) -> Result<(), StoreError>;
});
