use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// The only claim kind this crate issues today. Kept as an explicit field
/// (rather than inferring "it's an agent token because it decoded") so a
/// future token kind can't be silently accepted by code that only checks
/// the signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Agent,
}

/// Claim set carried by a long-lived agent token. `exp`/`iat`
/// are Unix timestamps in seconds, matching `jsonwebtoken`'s expectations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentClaims {
    jti: Ulid,
    pub agent_id: String,
    pub organization_id: String,
    pub iat: i64,
    pub exp: i64,
    pub kind: TokenKind,
}

impl AgentClaims {
    pub fn new(agent_id: String, organization_id: String, iat: i64, exp: i64) -> Self {
        Self {
            jti: Ulid::new(),
            agent_id,
            organization_id,
            iat,
            exp,
            kind: TokenKind::Agent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_kind_as_snake_case() {
        let claims = AgentClaims::new("agent-1".into(), "org-1".into(), 0, 100);
        let json = serde_json::to_string(&claims).unwrap();
        assert!(json.contains("\"kind\":\"agent\""));
    }
}
