//! Transport Terminators: the stream (websocket) and poll
//! (request/response) edges of the control plane, both authenticating via
//! the Token Service and feeding decoded frames into the Reconciliation
//! Loop.

mod auth;
mod poll;
mod register;
mod status;
mod stream;

pub use poll::poll_handler;
pub use register::register_handler;
pub use status::{metrics_handler, status_handler};
pub use stream::stream_handler;

use crate::deployment::DeploymentEngine;
use crate::persistence::{AgentStore, DeploymentStore, DocumentStore, RegistrationTokenStore, TicketStore};
use crate::reconcile::Reconciler;
use crate::registry::AgentRegistry;
use crate::session::SessionStore;
use crate::token::TokenService;
use actix_web::web;
use std::sync::Arc;

/// Everything a transport handler needs, generic over a single backing store
/// that satisfies every persistence trait at once (the only shape this crate
/// ships, [`crate::persistence::memory::InMemoryStore`]) rather than five
/// independent type parameters.
pub struct ControlPlaneState<S> {
    reconciler: Reconciler<S, S, S, S, S>,
    tokens: TokenService<S, S>,
    max_inbound_size: usize,
}

impl<S> ControlPlaneState<S>
where
    S: AgentStore + DeploymentStore + DocumentStore + TicketStore + RegistrationTokenStore + Clone + 'static,
{
    pub fn new(
        store: S,
        sessions: Arc<SessionStore>,
        tokens: TokenService<S, S>,
        max_inbound_size: usize,
    ) -> Self {
        let registry = AgentRegistry::new(store.clone(), store.clone());
        let deployments = DeploymentEngine::new(store.clone(), store.clone(), store);
        Self {
            reconciler: Reconciler::new(registry, deployments, sessions),
            tokens,
            max_inbound_size,
        }
    }
}

/// Registers the stream, poll and registration routes under
/// `/v1/organizations/{organization_id}/opamp/...`.
pub fn configure<S>(cfg: &mut web::ServiceConfig)
where
    S: AgentStore + DeploymentStore + DocumentStore + TicketStore + RegistrationTokenStore + Clone + Send + Sync + 'static,
{
    cfg.service(
        web::resource("/v1/organizations/{organization_id}/opamp/stream").to(stream_handler::<S>),
    )
    .service(web::resource("/v1/organizations/{organization_id}/opamp/poll").to(poll_handler::<S>))
    .service(
        web::resource("/v1/organizations/{organization_id}/opamp/register")
            .to(register_handler::<S>),
    )
    .service(web::resource("/healthz").to(status_handler::<S>))
    .service(web::resource("/metrics").to(metrics_handler::<S>));
}
