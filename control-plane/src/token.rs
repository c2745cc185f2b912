//! Control-plane Token Service: layers organization scoping,
//! single-use bookkeeping, and agent-existence checks on top of the
//! signature/digest primitives in `flowgate_token`.

use crate::model::{AgentId, OrganizationId};
use crate::persistence::{AgentStore, RegistrationTokenRecord, RegistrationTokenStore, StoreError};
use flowgate_token::registration_token;
use flowgate_token::{AgentClaims, SigningKeyring};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use ulid::Ulid;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("registration token is invalid")]
    RegistrationInvalid,

    #[error("registration token has expired")]
    RegistrationExpired,

    #[error("registration token has already been used")]
    RegistrationConsumed,

    #[error("agent token is invalid")]
    AgentTokenInvalid,

    #[error("agent token has expired")]
    AgentTokenExpired,

    #[error("agent token references an agent that no longer exists")]
    AgentTokenUnknownAgent,

    #[error("agent token organization does not match the requested organization")]
    OrganizationMismatch,

    #[error("persistence failure: `{0}`")]
    Store(#[from] StoreError),
}

pub struct TokenService<R, A> {
    registration_tokens: R,
    agents: A,
    keyring: SigningKeyring,
    registration_ttl: Duration,
    agent_token_ttl: Duration,
}

impl<R, A> TokenService<R, A>
where
    R: RegistrationTokenStore,
    A: AgentStore,
{
    pub fn new(
        registration_tokens: R,
        agents: A,
        keyring: SigningKeyring,
        registration_ttl: Duration,
        agent_token_ttl: Duration,
    ) -> Self {
        Self {
            registration_tokens,
            agents,
            keyring,
            registration_ttl,
            agent_token_ttl,
        }
    }

    /// Mints a registration token scoped to `organization_id`. The returned
    /// string is `{token_id}.{secret}` — the id lets `verify_registration`
    /// find the right digest without trying every stored one; the secret
    /// is exactly what `flowgate_token::registration_token` generates and
    /// never touches storage in plain form.
    pub fn issue_registration_token(
        &self,
        organization_id: OrganizationId,
        now: SystemTime,
    ) -> Result<String, TokenError> {
        let (plain, digest) = registration_token::generate();
        let token_id = Ulid::new();

        self.registration_tokens.insert(RegistrationTokenRecord {
            token_id,
            organization_id,
            digest,
            created_at: now,
            expires_at: now + self.registration_ttl,
            consumed: false,
        })?;

        Ok(format!("{token_id}.{}", plain.as_str()))
    }

    /// Verifies and single-use-consumes a presented registration token.
    /// Cross-organization presentation and unknown tokens are both reported
    /// as `RegistrationInvalid` — never distinguished, so a caller can't
    /// use this to probe for tokens belonging to another organization.
    pub fn verify_registration_token(
        &self,
        organization_id: &OrganizationId,
        presented: &str,
        now: SystemTime,
    ) -> Result<(), TokenError> {
        let (id_part, secret_part) = presented
            .split_once('.')
            .ok_or(TokenError::RegistrationInvalid)?;
        let token_id: Ulid = id_part.parse().map_err(|_| TokenError::RegistrationInvalid)?;

        let record = match self.registration_tokens.get(token_id) {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => return Err(TokenError::RegistrationInvalid),
            Err(other) => return Err(other.into()),
        };

        if &record.organization_id != organization_id {
            return Err(TokenError::RegistrationInvalid);
        }
        if record.consumed {
            return Err(TokenError::RegistrationConsumed);
        }
        if now > record.expires_at {
            return Err(TokenError::RegistrationExpired);
        }

        registration_token::verify(secret_part, &record.digest)
            .map_err(|_| TokenError::RegistrationInvalid)?;

        self.registration_tokens.mark_consumed(token_id)?;
        Ok(())
    }

    /// Returned exactly once, at registration.
    pub fn issue_agent_token(
        &self,
        agent_id: AgentId,
        organization_id: &OrganizationId,
        now: SystemTime,
    ) -> Result<String, TokenError> {
        let iat = unix_seconds(now);
        let exp = unix_seconds(now + self.agent_token_ttl);
        let claims = AgentClaims::new(agent_id.to_string(), organization_id.to_string(), iat, exp);
        self.keyring
            .sign(&claims)
            .map_err(|_| TokenError::AgentTokenInvalid)
    }

    /// Enforces verification requirements: valid signature, `kind=agent`,
    /// not expired, `agent_id` resolves to an existing agent, and the
    /// claimed organization matches the caller's.
    pub fn verify_agent_token(
        &self,
        organization_id: &OrganizationId,
        token: &str,
    ) -> Result<AgentId, TokenError> {
        let claims = self.keyring.verify(token).map_err(|err| match err {
            flowgate_token::JwtError::Expired => TokenError::AgentTokenExpired,
            _ => TokenError::AgentTokenInvalid,
        })?;

        let agent_ulid: ulid::Ulid = claims
            .agent_id
            .parse()
            .map_err(|_| TokenError::AgentTokenInvalid)?;
        let agent_id = AgentId::from(agent_ulid);

        let agent = match self.agents.get(agent_id) {
            Ok(agent) => agent,
            Err(StoreError::NotFound(_)) => return Err(TokenError::AgentTokenUnknownAgent),
            Err(other) => return Err(other.into()),
        };

        if agent.organization_id.as_str() != claims.organization_id
            || &agent.organization_id != organization_id
        {
            return Err(TokenError::OrganizationMismatch);
        }

        Ok(agent_id)
    }
}

fn unix_seconds(t: SystemTime) -> i64 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::memory::InMemoryStore;
    use assert_matches::assert_matches;
    use std::sync::Arc;

    fn keyring() -> SigningKeyring {
        SigningKeyring::new(vec![("k1".into(), b"test-secret-material".to_vec())]).unwrap()
    }

    fn service(store: Arc<InMemoryStore>) -> TokenService<Arc<InMemoryStore>, Arc<InMemoryStore>> {
        TokenService::new(
            store.clone(),
            store,
            keyring(),
            Duration::from_secs(3600),
            Duration::from_secs(86_400 * 365),
        )
    }

    #[test]
    fn registration_token_round_trips() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(store);
        let org = OrganizationId::new("org-1");
        let now = SystemTime::now();

        let token = svc.issue_registration_token(org.clone(), now).unwrap();
        svc.verify_registration_token(&org, &token, now).unwrap();
    }

    #[test]
    fn registration_token_is_single_use() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(store);
        let org = OrganizationId::new("org-1");
        let now = SystemTime::now();

        let token = svc.issue_registration_token(org.clone(), now).unwrap();
        svc.verify_registration_token(&org, &token, now).unwrap();
        let err = svc.verify_registration_token(&org, &token, now).unwrap_err();
        assert_matches!(err, TokenError::RegistrationConsumed);
    }

    #[test]
    fn registration_token_rejected_for_a_different_organization() {
        let store = Arc::new(InMemoryStore::new());
        let svc = service(store);
        let now = SystemTime::now();

        let token = svc
            .issue_registration_token(OrganizationId::new("org-1"), now)
            .unwrap();
        let err = svc
            .verify_registration_token(&OrganizationId::new("org-2"), &token, now)
            .unwrap_err();
        assert_matches!(err, TokenError::RegistrationInvalid);
    }

    #[test]
    fn agent_token_round_trips_and_checks_organization() {
        use crate::model::{
            AgentHealth, ManagementMode, RegistrationState, RemoteConfigStatus,
        };
        use flowgate_wire::InstanceUid;

        let store = Arc::new(InMemoryStore::new());
        let org = OrganizationId::new("org-1");
        let agent_id = AgentId::new();
        AgentStore::insert(
            &store,
            crate::model::Agent {
                agent_id,
                instance_uid: InstanceUid::from_bytes(&[1u8; 16]).unwrap(),
                organization_id: org.clone(),
                name: "a".into(),
                identifying_attributes: Default::default(),
                management_mode: ManagementMode::Supervisor,
                agent_capabilities: 0,
                server_capabilities: 0,
                last_seen: SystemTime::now(),
                last_sequence_num: 0,
                effective_config_hash: Vec::new(),
                remote_config_hash: Vec::new(),
                remote_config_status: RemoteConfigStatus::Unset,
                remote_config_error: None,
                health: AgentHealth::default(),
                registration_state: RegistrationState::Registered,
                version: 0,
            },
        )
        .unwrap();

        let svc = service(store);
        let token = svc
            .issue_agent_token(agent_id, &org, SystemTime::now())
            .unwrap();
        let verified = svc.verify_agent_token(&org, &token).unwrap();
        assert_eq!(verified, agent_id);

        let err = svc
            .verify_agent_token(&OrganizationId::new("org-2"), &token)
            .unwrap_err();
        assert_matches!(err, TokenError::OrganizationMismatch);
    }
}
