//! Internal `/healthz` status surface (SPEC_FULL §1.6), grounded in the
//! teacher's `agent_control/http_server/status_handler.rs`: a small
//! `Serialize`able snapshot read from shared state, no request body.

use super::ControlPlaneState;
use crate::persistence::{AgentStore, DeploymentStore, DocumentStore, RegistrationTokenStore, TicketStore};
use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;
use std::sync::Arc;

#[derive(Serialize)]
struct Status {
    healthy: bool,
    open_sessions: usize,
}

pub async fn status_handler<S>(state: web::Data<Arc<ControlPlaneState<S>>>) -> impl Responder
where
    S: AgentStore + DeploymentStore + DocumentStore + TicketStore + RegistrationTokenStore + Clone + 'static,
{
    let open_sessions = state.reconciler.sessions().snapshot().len();
    HttpResponse::Ok().json(Status {
        healthy: true,
        open_sessions,
    })
}

/// Prometheus text-exposition counters (SPEC_FULL §1.6), read from the same
/// `SessionStore` the `/healthz` handler above reads its session count from.
pub async fn metrics_handler<S>(state: web::Data<Arc<ControlPlaneState<S>>>) -> impl Responder
where
    S: AgentStore + DeploymentStore + DocumentStore + TicketStore + RegistrationTokenStore + Clone + 'static,
{
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(state.reconciler.sessions().metrics().render())
}
