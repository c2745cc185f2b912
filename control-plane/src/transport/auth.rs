use crate::model::{AgentId, OrganizationId};
use crate::persistence::{AgentStore, RegistrationTokenStore};
use crate::token::{TokenError, TokenService};
use actix_web::http::header;
use actix_web::HttpRequest;
use serde::Deserialize;

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// A bearer header takes precedence over the `?token=` query parameter
///.
pub fn extract_bearer(req: &HttpRequest) -> Option<String> {
    if let Some(value) = req.headers().get(header::AUTHORIZATION) {
        if let Ok(s) = value.to_str() {
            if let Some(rest) = s.strip_prefix("Bearer ") {
                return Some(rest.to_string());
            }
        }
    }

    actix_web::web::Query::<TokenQuery>::from_query(req.query_string())
        .ok()
        .and_then(|q| q.into_inner().token)
}

pub fn authenticate_agent<R, A>(
    req: &HttpRequest,
    tokens: &TokenService<R, A>,
    organization_id: &OrganizationId,
) -> Result<AgentId, TokenError>
where
    R: RegistrationTokenStore,
    A: AgentStore,
{
    let token = extract_bearer(req).ok_or(TokenError::AgentTokenInvalid)?;
    tokens.verify_agent_token(organization_id, &token)
}
