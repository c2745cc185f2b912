//! Deployment Engine: desired-state orchestration over a
//! target set of agents, batched by rollout strategy and advanced as
//! registry state changes.

mod error;

pub use error::DeploymentError;

use crate::model::{
    Agent, AgentDeploymentStatus, AgentId, ConfigurationDocument, Deployment, DeploymentId,
    DeploymentPhase, DeploymentState, DocumentId, OrganizationId, RemoteConfigStatus,
    RolloutStrategy, TargetingPredicate,
};
use crate::persistence::{AgentStore, DeploymentStore, DocumentStore};
use std::time::SystemTime;
use tracing::{info, warn};

pub struct DeploymentEngine<Dep, Agt, Doc> {
    deployments: Dep,
    agents: Agt,
    documents: Doc,
}

impl<Dep, Agt, Doc> DeploymentEngine<Dep, Agt, Doc>
where
    Dep: DeploymentStore,
    Agt: AgentStore,
    Doc: DocumentStore,
{
    pub fn new(deployments: Dep, agents: Agt, documents: Doc) -> Self {
        Self {
            deployments,
            agents,
            documents,
        }
    }

    pub fn get(&self, deployment_id: DeploymentId) -> Result<Deployment, DeploymentError> {
        Ok(self.deployments.get(deployment_id)?)
    }

    pub fn list_statuses(
        &self,
        deployment_id: DeploymentId,
    ) -> Result<Vec<AgentDeploymentStatus>, DeploymentError> {
        Ok(self.deployments.list_statuses(deployment_id)?)
    }

    /// Creates a deployment. Supersedes overlapping non-terminal deployments
    /// by marking their rows `skipped` for targets the new deployment
    /// claims, then batches the initial offer per `rollout`.
    pub fn create_deployment(
        &self,
        organization_id: OrganizationId,
        name: String,
        document_ref: DocumentId,
        rollout: RolloutStrategy,
        targeting: TargetingPredicate,
        tolerate_failures: bool,
        now: SystemTime,
    ) -> Result<DeploymentId, DeploymentError> {
        let mut targets: Vec<Agent> = self
            .agents
            .list_active(&organization_id)?
            .into_iter()
            .filter(|agent| targeting.matches(agent))
            .collect();
        targets.sort_by_key(|agent| agent.agent_id);

        if targets.is_empty() {
            return Err(DeploymentError::PreconditionFailed(
                "rollout target set is empty".into(),
            ));
        }

        let deployment_id = DeploymentId::new();
        self.supersede_overlapping(&organization_id, &targets, now)?;

        let offered: std::collections::HashSet<AgentId> =
            initial_offer_set(rollout, &targets).into_iter().collect();

        let statuses: Vec<AgentDeploymentStatus> = targets
            .iter()
            .map(|agent| {
                let mut status = AgentDeploymentStatus::new(deployment_id, agent.agent_id, now);
                if offered.contains(&agent.agent_id) {
                    status.transition(DeploymentPhase::Offered, now);
                }
                status
            })
            .collect();

        let deployment = Deployment {
            deployment_id,
            organization_id,
            name,
            document_ref,
            rollout_strategy: rollout,
            targeting,
            tolerate_failures,
            state: DeploymentState::InProgress,
            created_at: now,
            started_at: Some(now),
            completed_at: None,
            supersedes: None,
            deadline: None,
        };

        self.deployments.insert_with_statuses(deployment, statuses)?;
        info!(%deployment_id, targets = targets.len(), "deployment created");
        Ok(deployment_id)
    }

    fn supersede_overlapping(
        &self,
        organization_id: &OrganizationId,
        targets: &[Agent],
        now: SystemTime,
    ) -> Result<(), DeploymentError> {
        let target_ids: std::collections::HashSet<AgentId> =
            targets.iter().map(|agent| agent.agent_id).collect();

        for prior in self.deployments.list_non_terminal(organization_id)? {
            for mut status in self.deployments.list_statuses(prior.deployment_id)? {
                if target_ids.contains(&status.agent_id) && status.transition(DeploymentPhase::Skipped, now) {
                    self.deployments.update_status(status)?;
                }
            }
        }
        Ok(())
    }

    /// Canary batching: offers the remaining queued targets.
    pub fn promote_canary(&self, deployment_id: DeploymentId, now: SystemTime) -> Result<(), DeploymentError> {
        let deployment = self.deployments.get(deployment_id)?;
        if !matches!(deployment.rollout_strategy, RolloutStrategy::Canary { .. }) {
            return Err(DeploymentError::PreconditionFailed(
                "promote_canary called on a non-canary deployment".into(),
            ));
        }
        self.offer_all_queued(deployment_id, now)
    }

    /// Staged batching: offers the next wave of queued targets.
    pub fn advance_stage(&self, deployment_id: DeploymentId, now: SystemTime) -> Result<(), DeploymentError> {
        let deployment = self.deployments.get(deployment_id)?;
        let RolloutStrategy::Staged { wave_size } = deployment.rollout_strategy else {
            return Err(DeploymentError::PreconditionFailed(
                "advance_stage called on a non-staged deployment".into(),
            ));
        };

        let mut queued: Vec<AgentDeploymentStatus> = self
            .deployments
            .list_statuses(deployment_id)?
            .into_iter()
            .filter(|s| s.phase == DeploymentPhase::Queued)
            .collect();
        queued.sort_by_key(|s| s.agent_id);

        for mut status in queued.into_iter().take(wave_size) {
            status.transition(DeploymentPhase::Offered, now);
            self.deployments.update_status(status)?;
        }
        Ok(())
    }

    fn offer_all_queued(&self, deployment_id: DeploymentId, now: SystemTime) -> Result<(), DeploymentError> {
        for mut status in self.deployments.list_statuses(deployment_id)? {
            if status.phase == DeploymentPhase::Queued && status.transition(DeploymentPhase::Offered, now) {
                self.deployments.update_status(status)?;
            }
        }
        Ok(())
    }

    /// Per-agent advancement, driven by the agent's latest
    /// registry state rather than the raw inbound message — idempotent to
    /// call more than once for the same state.
    pub fn advance_for_agent(
        &self,
        agent: &Agent,
        now: SystemTime,
    ) -> Result<Option<AgentDeploymentStatus>, DeploymentError> {
        let Some(mut status) = self.deployments.active_status_for_agent(agent.agent_id)? else {
            return Ok(None);
        };
        if status.phase.is_terminal() {
            return Ok(Some(status));
        }

        let deployment = self.deployments.get(status.deployment_id)?;
        let document = self.documents.get(deployment.document_ref)?;

        let mut deployment_failed = false;
        match agent.remote_config_status {
            RemoteConfigStatus::Applying if agent.remote_config_hash == document.hash => {
                status.transition(DeploymentPhase::Applying, now);
            }
            RemoteConfigStatus::Applied if agent.effective_config_hash == document.hash => {
                status.last_reported_hash = agent.effective_config_hash.clone();
                status.transition(DeploymentPhase::Applied, now);
            }
            RemoteConfigStatus::Failed => {
                status.error = agent.remote_config_error.clone();
                status.transition(DeploymentPhase::Failed, now);
                deployment_failed = !deployment.tolerate_failures;
            }
            _ => {}
        }

        self.deployments.update_status(status.clone())?;

        if deployment_failed {
            self.fail_deployment(&deployment, now)?;
        } else {
            self.maybe_complete(&deployment, now)?;
        }

        Ok(Some(status))
    }

    /// The document the agent should currently be offered, if its active
    /// deployment is still waiting on it.
    pub fn pending_offer(
        &self,
        agent_id: AgentId,
    ) -> Result<Option<ConfigurationDocument>, DeploymentError> {
        let Some(status) = self.deployments.active_status_for_agent(agent_id)? else {
            return Ok(None);
        };
        if !matches!(status.phase, DeploymentPhase::Offered | DeploymentPhase::Applying) {
            return Ok(None);
        }
        let deployment = self.deployments.get(status.deployment_id)?;
        Ok(Some(self.documents.get(deployment.document_ref)?))
    }

    /// Handles an agent observed inactive beyond a deployment-scoped
    /// timeout": marks non-terminal statuses for inactive agents `skipped`.
    /// Intended to be called periodically, not from the inbound-message
    /// path.
    pub fn skip_inactive_targets(
        &self,
        deployment_id: DeploymentId,
        inactive_agent_ids: &[AgentId],
        now: SystemTime,
    ) -> Result<(), DeploymentError> {
        let inactive: std::collections::HashSet<AgentId> =
            inactive_agent_ids.iter().copied().collect();
        for mut status in self.deployments.list_statuses(deployment_id)? {
            if inactive.contains(&status.agent_id) && status.transition(DeploymentPhase::Skipped, now) {
                self.deployments.update_status(status)?;
            }
        }
        let deployment = self.deployments.get(deployment_id)?;
        self.maybe_complete(&deployment, now)
    }

    /// The "no targets applied by deadline" failure path. Call
    /// periodically against deployments carrying a `deadline`.
    pub fn check_deadline(&self, deployment_id: DeploymentId, now: SystemTime) -> Result<(), DeploymentError> {
        let deployment = self.deployments.get(deployment_id)?;
        let Some(deadline) = deployment.deadline else {
            return Ok(());
        };
        if now < deadline || deployment.state.is_terminal() {
            return Ok(());
        }
        let any_applied = self
            .deployments
            .list_statuses(deployment_id)?
            .iter()
            .any(|s| s.phase == DeploymentPhase::Applied);
        if !any_applied {
            self.fail_deployment(&deployment, now)?;
        }
        Ok(())
    }

    fn fail_deployment(&self, deployment: &Deployment, now: SystemTime) -> Result<(), DeploymentError> {
        if !deployment.state.can_transition_to(DeploymentState::Failed) {
            return Ok(());
        }
        let mut updated = deployment.clone();
        updated.state = DeploymentState::Failed;
        updated.completed_at = Some(now);
        self.deployments.update(updated)?;
        warn!(deployment_id = %deployment.deployment_id, "deployment failed");
        Ok(())
    }

    fn maybe_complete(&self, deployment: &Deployment, now: SystemTime) -> Result<(), DeploymentError> {
        if deployment.state.is_terminal() {
            return Ok(());
        }
        let statuses = self.deployments.list_statuses(deployment.deployment_id)?;
        let non_skipped: Vec<&AgentDeploymentStatus> = statuses
            .iter()
            .filter(|s| s.phase != DeploymentPhase::Skipped)
            .collect();

        let all_terminal = non_skipped.iter().all(|s| s.phase.is_terminal());
        let any_applied = non_skipped.iter().any(|s| s.phase == DeploymentPhase::Applied);

        if all_terminal && any_applied && deployment.state.can_transition_to(DeploymentState::Completed) {
            let mut updated = deployment.clone();
            updated.state = DeploymentState::Completed;
            updated.completed_at = Some(now);
            self.deployments.update(updated)?;
            info!(deployment_id = %deployment.deployment_id, "deployment completed");
            self.finalize_rollback_if_any(deployment, now)?;
        }
        Ok(())
    }

    fn finalize_rollback_if_any(&self, deployment: &Deployment, now: SystemTime) -> Result<(), DeploymentError> {
        let Some(original_id) = deployment.supersedes else {
            return Ok(());
        };
        let original = self.deployments.get(original_id)?;
        if original.state.can_transition_to(DeploymentState::RolledBack) {
            let mut updated = original;
            updated.state = DeploymentState::RolledBack;
            updated.completed_at = Some(now);
            self.deployments.update(updated)?;
        }
        Ok(())
    }

    /// Re-deploys the document the original
    /// deployment itself superseded, to the same target set, and links the
    /// two so the original flips to `rolled_back` once the rollback
    /// deployment completes.
    pub fn rollback(&self, deployment_id: DeploymentId, now: SystemTime) -> Result<DeploymentId, DeploymentError> {
        let original = self.deployments.get(deployment_id)?;
        let previous_document = original.supersedes.map_or_else(
            || {
                Err(DeploymentError::PreconditionFailed(
                    "deployment has no prior document to roll back to".into(),
                ))
            },
            |prev_id| {
                self.deployments
                    .get(prev_id)
                    .map(|prev| prev.document_ref)
                    .map_err(DeploymentError::from)
            },
        )?;

        let new_deployment_id = DeploymentId::new();
        let mut targets: Vec<Agent> = self
            .agents
            .list_active(&original.organization_id)?
            .into_iter()
            .filter(|agent| original.targeting.matches(agent))
            .collect();
        targets.sort_by_key(|agent| agent.agent_id);

        let statuses: Vec<AgentDeploymentStatus> = targets
            .iter()
            .map(|agent| {
                let mut status = AgentDeploymentStatus::new(new_deployment_id, agent.agent_id, now);
                status.transition(DeploymentPhase::Offered, now);
                status
            })
            .collect();

        let rollback_deployment = Deployment {
            deployment_id: new_deployment_id,
            organization_id: original.organization_id.clone(),
            name: format!("{}-rollback", original.name),
            document_ref: previous_document,
            rollout_strategy: RolloutStrategy::Immediate,
            targeting: original.targeting.clone(),
            tolerate_failures: true,
            state: DeploymentState::InProgress,
            created_at: now,
            started_at: Some(now),
            completed_at: None,
            supersedes: Some(deployment_id),
            deadline: None,
        };

        self.deployments
            .insert_with_statuses(rollback_deployment, statuses)?;
        Ok(new_deployment_id)
    }
}

/// The initial batching rule, a pure function over the deterministically
/// `agent_id`-ordered target list.
fn initial_offer_set(rollout: RolloutStrategy, ordered_targets: &[Agent]) -> Vec<AgentId> {
    match rollout {
        RolloutStrategy::Immediate => ordered_targets.iter().map(|a| a.agent_id).collect(),
        RolloutStrategy::Canary { canary_percent } => {
            let n = ordered_targets.len();
            let count = (n * canary_percent as usize / 100).max(1).min(n);
            ordered_targets[..count].iter().map(|a| a.agent_id).collect()
        }
        RolloutStrategy::Staged { wave_size } => ordered_targets
            .iter()
            .take(wave_size)
            .map(|a| a.agent_id)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AgentHealth, ManagementMode, RegistrationState, RemoteConfigStatus};
    use crate::persistence::memory::InMemoryStore;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn engine() -> (
        Arc<InMemoryStore>,
        DeploymentEngine<Arc<InMemoryStore>, Arc<InMemoryStore>, Arc<InMemoryStore>>,
    ) {
        let store = Arc::new(InMemoryStore::new());
        let eng = DeploymentEngine::new(store.clone(), store.clone(), store.clone());
        (store, eng)
    }

    fn agent(org: &OrganizationId, seed: u8) -> Agent {
        use flowgate_wire::InstanceUid;
        Agent {
            agent_id: AgentId::new(),
            instance_uid: InstanceUid::from_bytes(&[seed; 16]).unwrap(),
            organization_id: org.clone(),
            name: format!("agent-{seed}"),
            identifying_attributes: HashMap::new(),
            management_mode: ManagementMode::Supervisor,
            agent_capabilities: 0x7DE7,
            server_capabilities: 0,
            last_seen: SystemTime::now(),
            last_sequence_num: 0,
            effective_config_hash: Vec::new(),
            remote_config_hash: Vec::new(),
            remote_config_status: RemoteConfigStatus::Unset,
            remote_config_error: None,
            health: AgentHealth::default(),
            registration_state: RegistrationState::Active,
            version: 0,
        }
    }

    #[test]
    fn create_deployment_rejects_empty_target_set() {
        let (_store, eng) = engine();
        let org = OrganizationId::new("org-1");
        let err = eng
            .create_deployment(
                org,
                "rollout".into(),
                DocumentId::new(),
                RolloutStrategy::Immediate,
                TargetingPredicate::default(),
                false,
                SystemTime::now(),
            )
            .unwrap_err();
        assert!(matches!(err, DeploymentError::PreconditionFailed(_)));
    }

    #[test]
    fn immediate_rollout_offers_every_target() {
        let (store, eng) = engine();
        let org = OrganizationId::new("org-1");
        for seed in 1..=3u8 {
            store.insert(agent(&org, seed)).unwrap();
        }

        let deployment_id = eng
            .create_deployment(
                org,
                "rollout".into(),
                DocumentId::new(),
                RolloutStrategy::Immediate,
                TargetingPredicate::default(),
                false,
                SystemTime::now(),
            )
            .unwrap();

        let statuses = store.list_statuses(deployment_id).unwrap();
        assert_eq!(statuses.len(), 3);
        assert!(statuses.iter().all(|s| s.phase == DeploymentPhase::Offered));
    }

    #[test]
    fn canary_offers_only_the_percentage_and_promote_offers_the_rest() {
        let (store, eng) = engine();
        let org = OrganizationId::new("org-1");
        for seed in 1..=4u8 {
            store.insert(agent(&org, seed)).unwrap();
        }

        let deployment_id = eng
            .create_deployment(
                org,
                "rollout".into(),
                DocumentId::new(),
                RolloutStrategy::Canary { canary_percent: 25 },
                TargetingPredicate::default(),
                false,
                SystemTime::now(),
            )
            .unwrap();

        let statuses = store.list_statuses(deployment_id).unwrap();
        assert_eq!(
            statuses.iter().filter(|s| s.phase == DeploymentPhase::Offered).count(),
            1
        );

        eng.promote_canary(deployment_id, SystemTime::now()).unwrap();
        let statuses = store.list_statuses(deployment_id).unwrap();
        assert!(statuses.iter().all(|s| s.phase == DeploymentPhase::Offered));
    }

    #[test]
    fn failure_without_tolerance_fails_the_whole_deployment() {
        let (store, eng) = engine();
        let org = OrganizationId::new("org-1");
        let mut a1 = agent(&org, 1);
        store.insert(a1.clone()).unwrap();

        let document =
            ConfigurationDocument::new(org.clone(), b"cfg".to_vec(), SystemTime::now(), None);
        let doc_id = document.doc_id;
        store.put(document).unwrap();

        let deployment_id = eng
            .create_deployment(
                org,
                "rollout".into(),
                doc_id,
                RolloutStrategy::Immediate,
                TargetingPredicate::default(),
                false,
                SystemTime::now(),
            )
            .unwrap();

        a1.remote_config_status = RemoteConfigStatus::Failed;
        eng.advance_for_agent(&a1, SystemTime::now()).unwrap();

        let deployment = DeploymentStore::get(&store, deployment_id).unwrap();
        assert_eq!(deployment.state, DeploymentState::Failed);
    }

    #[test]
    fn applied_hash_match_completes_single_target_deployment() {
        let (store, eng) = engine();
        let org = OrganizationId::new("org-1");
        let mut a1 = agent(&org, 1);
        store.insert(a1.clone()).unwrap();

        let document =
            ConfigurationDocument::new(org.clone(), b"cfg".to_vec(), SystemTime::now(), None);
        let doc_id = document.doc_id;
        let doc_hash = document.hash.clone();
        store.put(document).unwrap();

        let deployment_id = eng
            .create_deployment(
                org,
                "rollout".into(),
                doc_id,
                RolloutStrategy::Immediate,
                TargetingPredicate::default(),
                false,
                SystemTime::now(),
            )
            .unwrap();

        a1.remote_config_status = RemoteConfigStatus::Applied;
        a1.effective_config_hash = doc_hash;
        eng.advance_for_agent(&a1, SystemTime::now()).unwrap();

        let deployment = DeploymentStore::get(&store, deployment_id).unwrap();
        assert_eq!(deployment.state, DeploymentState::Completed);
    }
}
