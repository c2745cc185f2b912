//! Control API: the inward-facing surface a UI/REST layer
//! drives — create/advance/rollback deployments, inspect agents, and
//! request on-demand effective-config reporting. Every operation is
//! organization-scoped; cross-organization access is refused with
//! not-found semantics rather than acknowledging the row exists.

use crate::deployment::{DeploymentEngine, DeploymentError};
use crate::model::{
    Agent, AgentDeploymentStatus, AgentId, ConfigRequestTicket, ConfigurationDocument,
    DeploymentId, DeploymentState, DocumentId, OrganizationId, RolloutStrategy, TargetingPredicate,
    TicketId, TicketState,
};
use crate::persistence::{AgentStore, DeploymentStore, DocumentStore, TicketStore};
use crate::registry::{AgentRegistry, RegistryError};
use std::time::{Duration, SystemTime};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlApiError {
    #[error("no such agent in this organization")]
    AgentNotFound,

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Deployment(#[from] DeploymentError),
}

/// Registry state plus the decoded capability names the Control API
/// exposes instead of a raw bit-field.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentView {
    pub agent: Agent,
    pub capability_names: Vec<&'static str>,
}

#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub attribute: Option<(String, String)>,
}

impl AgentFilter {
    fn matches(&self, agent: &Agent) -> bool {
        match &self.attribute {
            None => true,
            Some((key, value)) => agent.identifying_attributes.get(key) == Some(value),
        }
    }
}

/// Structural diff over two YAML documents, reported key by key rather
/// than as a line-oriented text diff.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DiffSummary {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

pub struct ControlApi<A, T, Dep, Doc> {
    registry: AgentRegistry<A, T>,
    deployments: DeploymentEngine<Dep, A, Doc>,
    tickets: T,
    documents: Doc,
    ticket_ttl: Duration,
}

impl<A, T, Dep, Doc> ControlApi<A, T, Dep, Doc>
where
    A: AgentStore + Clone,
    T: TicketStore + Clone,
    Dep: DeploymentStore,
    Doc: DocumentStore + Clone,
{
    pub fn new(
        registry: AgentRegistry<A, T>,
        deployments: DeploymentEngine<Dep, A, Doc>,
        tickets: T,
        documents: Doc,
        ticket_ttl: Duration,
    ) -> Self {
        Self {
            registry,
            deployments,
            tickets,
            documents,
            ticket_ttl,
        }
    }

    fn owned_agent(
        &self,
        organization_id: &OrganizationId,
        agent_id: AgentId,
    ) -> Result<Agent, ControlApiError> {
        let agent = self.registry.lookup(agent_id)?;
        if &agent.organization_id != organization_id {
            return Err(ControlApiError::AgentNotFound);
        }
        Ok(agent)
    }

    pub fn get_agent(
        &self,
        organization_id: &OrganizationId,
        agent_id: AgentId,
    ) -> Result<AgentView, ControlApiError> {
        let agent = self.owned_agent(organization_id, agent_id)?;
        let capability_names = decode_capability_names(agent.agent_capabilities);
        Ok(AgentView {
            agent,
            capability_names,
        })
    }

    pub fn list_agents(
        &self,
        organization_id: &OrganizationId,
        filter: &AgentFilter,
    ) -> Result<Vec<AgentView>, ControlApiError> {
        Ok(self
            .registry
            .list_active(organization_id)?
            .into_iter()
            .filter(|agent| filter.matches(agent))
            .map(|agent| {
                let capability_names = decode_capability_names(agent.agent_capabilities);
                AgentView {
                    agent,
                    capability_names,
                }
            })
            .collect())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn create_deployment(
        &self,
        organization_id: OrganizationId,
        name: String,
        document_ref: DocumentId,
        rollout: RolloutStrategy,
        targeting: TargetingPredicate,
        tolerate_failures: bool,
        now: SystemTime,
    ) -> Result<DeploymentId, ControlApiError> {
        Ok(self.deployments.create_deployment(
            organization_id,
            name,
            document_ref,
            rollout,
            targeting,
            tolerate_failures,
            now,
        )?)
    }

    pub fn promote_canary(
        &self,
        deployment_id: DeploymentId,
        now: SystemTime,
    ) -> Result<(), ControlApiError> {
        Ok(self.deployments.promote_canary(deployment_id, now)?)
    }

    pub fn advance_stage(
        &self,
        deployment_id: DeploymentId,
        now: SystemTime,
    ) -> Result<(), ControlApiError> {
        Ok(self.deployments.advance_stage(deployment_id, now)?)
    }

    pub fn rollback(
        &self,
        deployment_id: DeploymentId,
        now: SystemTime,
    ) -> Result<DeploymentId, ControlApiError> {
        Ok(self.deployments.rollback(deployment_id, now)?)
    }

    /// Creates a `ConfigRequestTicket`; the next outbound message
    /// for this agent picks up `FLAG_REPORT_EFFECTIVE_CONFIG` via
    /// [`crate::registry::AgentRegistry::has_pending_ticket`], consulted by
    /// the Reconciliation Loop.
    pub fn request_effective_config(
        &self,
        organization_id: &OrganizationId,
        agent_id: AgentId,
        now: SystemTime,
    ) -> Result<TicketId, ControlApiError> {
        self.owned_agent(organization_id, agent_id)?;

        let ticket = ConfigRequestTicket {
            ticket_id: TicketId::new(),
            agent_id,
            state: TicketState::Pending,
            created_at: now,
            expires_at: now + self.ticket_ttl,
            result_payload: None,
        };
        let ticket_id = ticket.ticket_id;
        self.tickets
            .insert(ticket)
            .map_err(|err| ControlApiError::Registry(err.into()))?;
        Ok(ticket_id)
    }

    /// A structural YAML diff between the agent's last-reported effective
    /// config and `reference_document`.
    pub fn compare_effective_config(
        &self,
        organization_id: &OrganizationId,
        agent_id: AgentId,
        reference_document: &ConfigurationDocument,
    ) -> Result<DiffSummary, ControlApiError> {
        let agent = self.owned_agent(organization_id, agent_id)?;

        let reported = self
            .documents
            .get_by_hash(organization_id, &agent.effective_config_hash)
            .map_err(DeploymentError::from)?;

        let reported_yaml = reported
            .as_ref()
            .map(|doc| parse_yaml(&doc.payload))
            .transpose()
            .unwrap_or(None)
            .unwrap_or(serde_yaml::Value::Null);
        let reference_yaml = parse_yaml(&reference_document.payload).unwrap_or(serde_yaml::Value::Null);

        Ok(diff_yaml(&reported_yaml, &reference_yaml))
    }

    pub fn deployment_status(
        &self,
        deployment_id: DeploymentId,
    ) -> Result<Vec<AgentDeploymentStatus>, ControlApiError> {
        Ok(self.deployments.list_statuses(deployment_id)?)
    }

    pub fn deployment_state(
        &self,
        deployment_id: DeploymentId,
    ) -> Result<DeploymentState, ControlApiError> {
        Ok(self.deployments.get(deployment_id)?.state)
    }
}

fn parse_yaml(payload: &[u8]) -> Option<serde_yaml::Value> {
    serde_yaml::from_slice(payload).ok()
}

fn decode_capability_names(bits: u64) -> Vec<&'static str> {
    use crate::capability::*;
    let mut names = Vec::new();
    let table: &[(u64, &str)] = &[
        (REPORTS_STATUS, "reports_status"),
        (ACCEPTS_REMOTE_CONFIG, "accepts_remote_config"),
        (REPORTS_EFFECTIVE_CONFIG, "reports_effective_config"),
        (ACCEPTS_PACKAGES, "accepts_packages"),
        (REPORTS_PACKAGE_STATUSES, "reports_package_statuses"),
        (REPORTS_OWN_TRACES, "reports_own_traces"),
        (REPORTS_OWN_METRICS, "reports_own_metrics"),
        (REPORTS_OWN_LOGS, "reports_own_logs"),
        (
            ACCEPTS_OPAMP_CONNECTION_SETTINGS,
            "accepts_opamp_connection_settings",
        ),
        (
            ACCEPTS_OTHER_CONNECTION_SETTINGS,
            "accepts_other_connection_settings",
        ),
        (ACCEPTS_RESTART_COMMAND, "accepts_restart_command"),
        (REPORTS_HEALTH, "reports_health"),
        (REPORTS_REMOTE_CONFIG, "reports_remote_config"),
        (REPORTS_HEARTBEAT, "reports_heartbeat"),
        (REPORTS_AVAILABLE_COMPONENTS, "reports_available_components"),
        (
            REPORTS_CONNECTION_SETTINGS_STATUS,
            "reports_connection_settings_status",
        ),
    ];
    for (bit, name) in table {
        if bits & bit != 0 {
            names.push(*name);
        }
    }
    names
}

/// Only the top level of a mapping is compared; nested mapping values that
/// differ are reported as a single `changed` entry at the top-level key,
/// not recursed into.
fn diff_yaml(before: &serde_yaml::Value, after: &serde_yaml::Value) -> DiffSummary {
    let mut summary = DiffSummary::default();
    let empty = serde_yaml::Mapping::new();
    let before_map = before.as_mapping().unwrap_or(&empty);
    let after_map = after.as_mapping().unwrap_or(&empty);

    for (key, before_value) in before_map {
        let Some(key_str) = key.as_str() else { continue };
        match after_map.get(key) {
            None => summary.removed.push(key_str.to_string()),
            Some(after_value) if after_value != before_value => {
                summary.changed.push(key_str.to_string())
            }
            Some(_) => {}
        }
    }
    for key in after_map.keys() {
        let Some(key_str) = key.as_str() else { continue };
        if !before_map.contains_key(key) {
            summary.added.push(key_str.to_string());
        }
    }
    summary.added.sort();
    summary.removed.sort();
    summary.changed.sort();
    summary
}
