use super::agent::Agent;
use super::ids::{AgentId, DeploymentId, DocumentId, OrganizationId};
use std::collections::HashMap;
use std::time::SystemTime;

/// A predicate over an agent's identifying attributes. An empty map matches
/// every active agent in the organization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TargetingPredicate(pub HashMap<String, String>);

impl TargetingPredicate {
    pub fn matches(&self, agent: &Agent) -> bool {
        self.0
            .iter()
            .all(|(key, value)| agent.identifying_attributes.get(key) == Some(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RolloutStrategy {
    Immediate,
    /// Percent of targets (1..=100) offered before `promote_canary` is
    /// called for the rest.
    Canary { canary_percent: u8 },
    /// Targets advance wave by wave via `advance_stage`. `None` wave size
    /// means "partition by an explicit tag"; here we only model
    /// the equal-sized-wave fallback, the tag-based partition is supplied
    /// by the caller via `TargetingPredicate` per wave at creation time.
    Staged { wave_size: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentState {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl DeploymentState {
    /// A deployment's state transitions only forward in the order
    /// pending -> in_progress -> {completed, failed, rolled_back}.
    pub fn can_transition_to(self, next: DeploymentState) -> bool {
        use DeploymentState::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Failed)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, RolledBack)
                | (Completed, RolledBack)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeploymentState::Completed | DeploymentState::Failed | DeploymentState::RolledBack
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub deployment_id: DeploymentId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub document_ref: DocumentId,
    pub rollout_strategy: RolloutStrategy,
    pub targeting: TargetingPredicate,
    pub tolerate_failures: bool,
    pub state: DeploymentState,
    pub created_at: SystemTime,
    pub started_at: Option<SystemTime>,
    pub completed_at: Option<SystemTime>,
    pub supersedes: Option<DeploymentId>,
    pub deadline: Option<SystemTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeploymentPhase {
    Queued,
    Offered,
    Applying,
    Applied,
    Failed,
    Skipped,
}

impl DeploymentPhase {
    /// Terminal phases are sticky for the lifetime of a deployment.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeploymentPhase::Applied | DeploymentPhase::Failed | DeploymentPhase::Skipped
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDeploymentStatus {
    pub deployment_id: DeploymentId,
    pub agent_id: AgentId,
    pub phase: DeploymentPhase,
    pub last_reported_hash: Vec<u8>,
    pub error: Option<String>,
    pub updated_at: SystemTime,
}

impl AgentDeploymentStatus {
    pub fn new(deployment_id: DeploymentId, agent_id: AgentId, now: SystemTime) -> Self {
        Self {
            deployment_id,
            agent_id,
            phase: DeploymentPhase::Queued,
            last_reported_hash: Vec::new(),
            error: None,
            updated_at: now,
        }
    }

    /// Moves to `next` unless the current phase is already terminal, in
    /// which case the transition is silently a no-op (terminal phases are
    /// sticky). Returns whether a transition actually happened.
    pub fn transition(&mut self, next: DeploymentPhase, now: SystemTime) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        self.phase = next;
        self.updated_at = now;
        true
    }
}
