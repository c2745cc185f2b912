use super::auth;
use super::ControlPlaneState;
use crate::error::{ControlPlaneError, OVERLOAD_RETRY_AFTER_SECS};
use crate::model::{AgentId, OrganizationId, Transport};
use crate::persistence::{AgentStore, DeploymentStore, DocumentStore, RegistrationTokenStore, TicketStore};
use crate::session::{CloseReason, SessionHandle, SessionStore};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use flowgate_wire::InstanceUid;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

const WRITER_DRAIN_INTERVAL: Duration = Duration::from_millis(200);
const WRITER_BATCH_SIZE: usize = 16;

/// Full-duplex transport: a websocket
/// session that, once opened, runs an independent reader task (decodes
/// frames into the Reconciliation Loop) and writer task (drains the
/// session's outbound queue) as separate async tasks, one per
/// responsibility, rather than one combined loop.
pub async fn stream_handler<S>(
    req: HttpRequest,
    body: web::Payload,
    path: web::Path<String>,
    state: web::Data<Arc<ControlPlaneState<S>>>,
) -> Result<HttpResponse, Error>
where
    S: AgentStore + DeploymentStore + DocumentStore + TicketStore + RegistrationTokenStore + Clone + Send + Sync + 'static,
{
    let organization_id = OrganizationId::new(path.into_inner());

    let agent_id = auth::authenticate_agent(&req, &state.tokens, &organization_id)
        .map_err(|err| actix_web::error::ErrorUnauthorized(err.to_string()))?;
    let agent = state
        .reconciler
        .registry()
        .lookup(agent_id)
        .map_err(|err| actix_web::error::ErrorUnauthorized(err.to_string()))?;

    let (response, mut session, msg_stream) = actix_ws::handle(&req, body)?;

    let sessions = state.reconciler.sessions().clone();
    let handle = match sessions.open(agent.instance_uid, Transport::Stream) {
        Ok(handle) => handle,
        Err(_) => {
            warn!(%agent_id, "rejecting stream session, too many open sessions");
            let err = ControlPlaneError::Overloaded {
                retry_after_secs: OVERLOAD_RETRY_AFTER_SECS,
            };
            return Ok(HttpResponse::ServiceUnavailable()
                .insert_header(("Retry-After", OVERLOAD_RETRY_AFTER_SECS.to_string()))
                .body(err.to_string()));
        }
    };

    if let Ok(initial) = state.reconciler.build_reply(&agent) {
        if let Ok(bytes) = flowgate_wire::codec::encode_server_to_agent(&initial) {
            let _ = session.binary(bytes).await;
        }
    }

    actix_web::rt::spawn(writer_loop(
        sessions.clone(),
        agent.instance_uid,
        handle,
        session.clone(),
    ));
    actix_web::rt::spawn(reader_loop(
        state.get_ref().clone(),
        agent_id,
        agent.instance_uid,
        sessions,
        msg_stream,
        session,
    ));

    Ok(response)
}

async fn writer_loop(
    sessions: Arc<SessionStore>,
    instance_uid: InstanceUid,
    mut handle: SessionHandle,
    mut ws: actix_ws::Session,
) {
    let mut ticker = tokio::time::interval(WRITER_DRAIN_INTERVAL);
    loop {
        tokio::select! {
            closed = handle.closed() => {
                debug!(%instance_uid, reason = ?closed.reason, "stream writer stopping");
                if let Some(final_message) = closed.final_message {
                    if let Ok(bytes) = flowgate_wire::codec::encode_server_to_agent(&final_message) {
                        let _ = ws.binary(bytes).await;
                    }
                }
                let _ = ws.close(None).await;
                return;
            }
            _ = ticker.tick() => {
                for queued in sessions.drain_outbound(&instance_uid, WRITER_BATCH_SIZE) {
                    match flowgate_wire::codec::encode_server_to_agent(&queued.payload) {
                        Ok(bytes) => {
                            if ws.binary(bytes).await.is_err() {
                                sessions.close_by_instance_uid(&instance_uid, CloseReason::Protocol);
                                return;
                            }
                        }
                        Err(err) => warn!(error = %err, %instance_uid, "failed to encode outbound frame"),
                    }
                }
            }
        }
    }
}

async fn reader_loop<S>(
    state: Arc<ControlPlaneState<S>>,
    agent_id: AgentId,
    instance_uid: InstanceUid,
    sessions: Arc<SessionStore>,
    mut msg_stream: actix_ws::MessageStream,
    mut ws: actix_ws::Session,
) where
    S: AgentStore + DeploymentStore + DocumentStore + TicketStore + RegistrationTokenStore + Clone,
{
    while let Some(frame) = msg_stream.next().await {
        match frame {
            Ok(actix_ws::Message::Binary(bytes)) => {
                match flowgate_wire::codec::decode_agent_to_server(&bytes, state.max_inbound_size) {
                    Ok(decoded) if decoded.instance_uid == instance_uid => {
                        sessions.record_inbound_sequence(&instance_uid, decoded.sequence_num);
                        if let Err(err) =
                            state.reconciler.handle_inbound(agent_id, &decoded, SystemTime::now())
                        {
                            warn!(error = %err, %agent_id, "reconciliation error on stream frame");
                        }
                    }
                    Ok(_) => {
                        warn!(%instance_uid, "stream frame instance_uid does not match token, closing");
                        sessions.close_by_instance_uid(&instance_uid, CloseReason::Protocol);
                        return;
                    }
                    Err(err) => {
                        warn!(error = %err, %instance_uid, "malformed stream frame, closing");
                        sessions.close_by_instance_uid(&instance_uid, CloseReason::Protocol);
                        return;
                    }
                }
            }
            Ok(actix_ws::Message::Ping(bytes)) => {
                let _ = ws.pong(&bytes).await;
            }
            Ok(actix_ws::Message::Close(_)) => {
                sessions.close_by_instance_uid(&instance_uid, CloseReason::Explicit);
                return;
            }
            Err(err) => {
                warn!(error = %err, %instance_uid, "stream protocol error, closing");
                sessions.close_by_instance_uid(&instance_uid, CloseReason::Protocol);
                return;
            }
            _ => {}
        }
    }
    sessions.close_by_instance_uid(&instance_uid, CloseReason::Explicit);
}
