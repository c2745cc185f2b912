use super::auth;
use super::ControlPlaneState;
use crate::model::{ManagementMode, OrganizationId};
use crate::persistence::{AgentStore, DeploymentStore, DocumentStore, RegistrationTokenStore, TicketStore};
use crate::registry::DeclaredIdentity;
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Serialize;
use std::sync::Arc;
use std::time::SystemTime;

#[derive(Serialize)]
struct RegisterResponse {
    agent_id: String,
    token: String,
}

/// Carries a registration token rather than an agent token: the
/// request body is a normal `AgentToServer` frame, used only for its
/// `instance_uid` and `agent_description`, so the same wire codec serves
/// both registration and ordinary reporting.
pub async fn register_handler<S>(
    req: HttpRequest,
    body: web::Bytes,
    path: web::Path<String>,
    state: web::Data<Arc<ControlPlaneState<S>>>,
) -> HttpResponse
where
    S: AgentStore + DeploymentStore + DocumentStore + TicketStore + RegistrationTokenStore + Clone + 'static,
{
    let organization_id = OrganizationId::new(path.into_inner());
    let now = SystemTime::now();

    let Some(presented) = auth::extract_bearer(&req) else {
        return HttpResponse::Unauthorized().body("missing registration token");
    };
    if let Err(err) = state
        .tokens
        .verify_registration_token(&organization_id, &presented, now)
    {
        return HttpResponse::Unauthorized().body(err.to_string());
    }

    let message = match flowgate_wire::codec::decode_agent_to_server(&body, state.max_inbound_size) {
        Ok(m) => m,
        Err(err) => return HttpResponse::BadRequest().body(err.to_string()),
    };

    let identifying_attributes = message
        .agent_description
        .map(|d| d.identifying_attributes)
        .unwrap_or_default();

    let management_mode = match identifying_attributes.get("management_mode").map(String::as_str) {
        Some("extension") => ManagementMode::Extension,
        _ => ManagementMode::Supervisor,
    };
    let name = identifying_attributes
        .get("service.name")
        .cloned()
        .unwrap_or_else(|| "unknown".to_string());

    let declared = DeclaredIdentity {
        name,
        identifying_attributes,
        management_mode,
    };

    let agent = match state.reconciler.registry().register(
        organization_id.clone(),
        message.instance_uid,
        declared,
        now,
    ) {
        Ok(agent) => agent,
        Err(err) => return HttpResponse::Conflict().body(err.to_string()),
    };

    let token = match state.tokens.issue_agent_token(agent.agent_id, &organization_id, now) {
        Ok(token) => token,
        Err(err) => return HttpResponse::InternalServerError().body(err.to_string()),
    };

    HttpResponse::Ok().json(RegisterResponse {
        agent_id: agent.agent_id.to_string(),
        token,
    })
}
