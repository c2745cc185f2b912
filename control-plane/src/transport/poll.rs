use super::auth;
use super::ControlPlaneState;
use crate::error::{ControlPlaneError, OVERLOAD_RETRY_AFTER_SECS};
use crate::model::{OrganizationId, Transport};
use crate::persistence::{AgentStore, DeploymentStore, DocumentStore, RegistrationTokenStore, TicketStore};
use crate::session::CloseReason;
use actix_web::{web, HttpRequest, HttpResponse};
use flowgate_wire::codec::{ServerToAgent, FLAG_MORE_AVAILABLE};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::warn;

/// Request/response transport: a virtual
/// session is opened for the duration of the request, the inbound message is
/// reconciled, and whatever the reconciliation loop queued is drained
/// straight back out as the response.
pub async fn poll_handler<S>(
    req: HttpRequest,
    body: web::Bytes,
    path: web::Path<String>,
    state: web::Data<Arc<ControlPlaneState<S>>>,
) -> HttpResponse
where
    S: AgentStore + DeploymentStore + DocumentStore + TicketStore + RegistrationTokenStore + Clone + 'static,
{
    let organization_id = OrganizationId::new(path.into_inner());

    let agent_id = match auth::authenticate_agent(&req, &state.tokens, &organization_id) {
        Ok(id) => id,
        Err(err) => return HttpResponse::Unauthorized().body(err.to_string()),
    };

    let message = match flowgate_wire::codec::decode_agent_to_server(&body, state.max_inbound_size) {
        Ok(m) => m,
        Err(err) => return HttpResponse::BadRequest().body(err.to_string()),
    };

    let agent = match state.reconciler.registry().lookup(agent_id) {
        Ok(agent) => agent,
        Err(_) => return HttpResponse::Unauthorized().finish(),
    };
    if agent.instance_uid != message.instance_uid {
        warn!(%agent_id, "poll request instance_uid does not match token");
        return HttpResponse::BadRequest().body("instance_uid does not match token");
    }

    let sessions = state.reconciler.sessions();
    let handle = match sessions.open(agent.instance_uid, Transport::Poll) {
        Ok(handle) => handle,
        Err(_) => {
            warn!(%agent_id, "rejecting poll session, too many open sessions");
            let err = ControlPlaneError::Overloaded {
                retry_after_secs: OVERLOAD_RETRY_AFTER_SECS,
            };
            return HttpResponse::ServiceUnavailable()
                .insert_header(("Retry-After", OVERLOAD_RETRY_AFTER_SECS.to_string()))
                .body(err.to_string());
        }
    };
    sessions.record_inbound_sequence(&agent.instance_uid, message.sequence_num);

    let now = SystemTime::now();
    if let Err(err) = state.reconciler.handle_inbound(agent_id, &message, now) {
        warn!(error = %err, %agent_id, "reconciliation error on poll request");
    }

    // A poll response carries exactly one `ServerToAgent`; only the oldest
    // queued message is drained so ordering within the session is preserved
    // across successive polls, and `more_available` tells the agent to come
    // straight back for the rest.
    let mut drained = sessions.drain_outbound(&agent.instance_uid, 1);
    let more_available = sessions.has_pending_outbound(&agent.instance_uid);
    sessions.close(handle.session_id, CloseReason::Explicit);

    let mut payload = drained.pop().map(|q| q.payload).unwrap_or(ServerToAgent {
        instance_uid: agent.instance_uid,
        capabilities: agent.server_capabilities,
        remote_config: None,
        error_response: None,
        command: None,
        flags: 0,
    });
    if more_available {
        payload.flags |= FLAG_MORE_AVAILABLE;
    }

    match flowgate_wire::codec::encode_server_to_agent(&payload) {
        Ok(bytes) => HttpResponse::Ok()
            .content_type("application/x-protobuf")
            .body(bytes),
        Err(err) => HttpResponse::InternalServerError().body(err.to_string()),
    }
}
