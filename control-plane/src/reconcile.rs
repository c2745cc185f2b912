//! Reconciliation Loop: the per-inbound-message pipeline that
//! turns a decoded `AgentToServer` into registry/deployment state changes
//! and the `ServerToAgent` reply, then hands that reply to the session's
//! outbound queue.

use crate::capability::ACCEPTS_REMOTE_CONFIG;
use crate::deployment::{DeploymentEngine, DeploymentError};
use crate::error::OVERLOAD_RETRY_AFTER_SECS;
use crate::model::{Agent, AgentId};
use crate::persistence::{AgentStore, DeploymentStore, DocumentStore, TicketStore};
use crate::registry::{AgentRegistry, RegistryError};
use crate::session::{CloseReason, EnqueueOutcome, MessageKind, QueuedMessage, SessionError, SessionStore};
use flowgate_wire::codec::{
    AgentToServer, ErrorResponseType, RemoteConfigOffer, ServerErrorResponse, ServerToAgent,
    FLAG_REPORT_EFFECTIVE_CONFIG,
};
use flowgate_wire::ConfigHash;
use std::collections::HashMap;
use std::time::SystemTime;
use thiserror::Error;
use tracing::warn;

/// The config document's payload is forwarded as a single opaque file under
/// this key — the wire format's `config_map` exists for multi-file configs,
/// but nothing upstream of the Deployment Engine splits a document into more
/// than one file yet.
const CONFIG_MAP_KEY: &str = "config.yaml";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("registry error: `{0}`")]
    Registry(#[from] RegistryError),

    #[error("deployment error: `{0}`")]
    Deployment(#[from] DeploymentError),

    #[error("session error: `{0}`")]
    Session(#[from] SessionError),
}

pub struct Reconciler<A, T, Dep, Agt, Doc> {
    registry: AgentRegistry<A, T>,
    deployments: DeploymentEngine<Dep, Agt, Doc>,
    sessions: std::sync::Arc<SessionStore>,
}

impl<A, T, Dep, Agt, Doc> Reconciler<A, T, Dep, Agt, Doc>
where
    A: AgentStore,
    T: TicketStore,
    Dep: DeploymentStore,
    Agt: AgentStore,
    Doc: DocumentStore,
{
    pub fn new(
        registry: AgentRegistry<A, T>,
        deployments: DeploymentEngine<Dep, Agt, Doc>,
        sessions: std::sync::Arc<SessionStore>,
    ) -> Self {
        Self {
            registry,
            deployments,
            sessions,
        }
    }

    pub fn registry(&self) -> &AgentRegistry<A, T> {
        &self.registry
    }

    pub fn deployments(&self) -> &DeploymentEngine<Dep, Agt, Doc> {
        &self.deployments
    }

    pub fn sessions(&self) -> &std::sync::Arc<SessionStore> {
        &self.sessions
    }

    /// Applies one inbound message, advances any active deployment for the
    /// agent, and enqueues the resulting `ServerToAgent` on its session. A
    /// full, non-supersedable outbound queue closes the session with
    /// `Overloaded` rather than propagating an error — this is the caller-visible side effect, not a
    /// failure of reconciliation itself.
    pub fn handle_inbound(
        &self,
        agent_id: AgentId,
        message: &AgentToServer,
        now: SystemTime,
    ) -> Result<(), ReconcileError> {
        self.registry.apply_inbound(agent_id, message, now)?;
        let agent = self.registry.lookup(agent_id)?;
        self.deployments.advance_for_agent(&agent, now)?;

        let reply = self.build_reply(&agent)?;
        self.enqueue(&agent, reply)?;
        Ok(())
    }

    /// Builds the outbound message for an agent's current state without
    /// requiring a fresh inbound message — used both after `handle_inbound`
    /// and for the initial message a stream session sends on connect.
    pub fn build_reply(&self, agent: &Agent) -> Result<ServerToAgent, ReconcileError> {
        let mut flags = 0u64;
        if self.registry.has_pending_ticket(agent.agent_id)? {
            flags |= FLAG_REPORT_EFFECTIVE_CONFIG;
        }

        let remote_config = if agent.agent_capabilities & ACCEPTS_REMOTE_CONFIG != 0 {
            self.deployments
                .pending_offer(agent.agent_id)?
                .filter(|document| document.hash != agent.remote_config_hash)
                .map(|document| RemoteConfigOffer {
                    config_map: HashMap::from([(CONFIG_MAP_KEY.to_string(), document.payload.clone())]),
                    hash: ConfigHash(document.hash.clone()),
                    signature: document.signature.clone().unwrap_or_default(),
                })
        } else {
            None
        };

        Ok(ServerToAgent {
            instance_uid: agent.instance_uid,
            capabilities: agent.server_capabilities,
            remote_config,
            error_response: None,
            command: None,
            flags,
        })
    }

    fn enqueue(&self, agent: &Agent, reply: ServerToAgent) -> Result<(), ReconcileError> {
        let kind = if reply.remote_config.is_some() {
            MessageKind::RemoteConfigOffer
        } else {
            MessageKind::ServerCapabilities
        };

        match self.sessions.send(
            &agent.instance_uid,
            QueuedMessage {
                kind,
                payload: reply,
            },
        ) {
            Ok(EnqueueOutcome::Enqueued | EnqueueOutcome::SupersededOldest) => Ok(()),
            Ok(EnqueueOutcome::Rejected) => {
                warn!(agent_id = %agent.agent_id, "outbound queue overloaded, closing session");
                let unavailable = ServerToAgent {
                    instance_uid: agent.instance_uid,
                    capabilities: agent.server_capabilities,
                    remote_config: None,
                    error_response: Some(ServerErrorResponse {
                        r#type: ErrorResponseType::Unavailable,
                        message: "outbound queue overloaded, retry later".into(),
                        retry_after_nanoseconds: OVERLOAD_RETRY_AFTER_SECS * 1_000_000_000,
                    }),
                    command: None,
                    flags: 0,
                };
                self.sessions.close_by_instance_uid_with_message(
                    &agent.instance_uid,
                    CloseReason::Overloaded,
                    unavailable,
                );
                Ok(())
            }
            Err(SessionError::NotFound) => Ok(()),
            Err(other) => Err(other.into()),
        }
    }
}
