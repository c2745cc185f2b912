//! The explicit value object that owns every subsystem: wires the Agent
//! Registry, Deployment Engine, Session Store, Token Service, Reconciler
//! and Control API together over one shared in-memory store.

use crate::config::Config;
use crate::control_api::ControlApi;
use crate::deployment::DeploymentEngine;
use crate::persistence::memory::InMemoryStore;
use crate::registry::AgentRegistry;
use crate::session::SessionStore;
use crate::token::TokenService;
use crate::transport::ControlPlaneState;
use flowgate_token::SigningKeyring;
use std::fs;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControlPlaneBuildError {
    #[error("failed to read signing key material at `{0}`: {1}")]
    KeyMaterial(String, std::io::Error),

    #[error("failed to build signing keyring: {0}")]
    Keyring(#[from] flowgate_token::JwtError),
}

pub type Store = Arc<InMemoryStore>;

/// Everything the binary needs to run: the HTTP-facing state plus the
/// Control API, sharing one backing store and one session store.
pub struct ControlPlane {
    pub transport_state: Arc<ControlPlaneState<Store>>,
    pub control_api: ControlApi<Store, Store, Store, Store>,
    pub sessions: Arc<SessionStore>,
}

impl ControlPlane {
    pub fn build(config: &Config) -> Result<Self, ControlPlaneBuildError> {
        let store: Store = Arc::new(InMemoryStore::new());
        let sessions = Arc::new(SessionStore::new(
            config.transport.max_outbound_queue_depth,
            config.transport.max_sessions,
        ));

        let keys = load_signing_keys(&config.token.signing_key_paths)?;
        let keyring = SigningKeyring::new(keys)?;
        let tokens = TokenService::new(
            store.clone(),
            store.clone(),
            keyring,
            config.token.registration_token_ttl,
            config.token.agent_token_ttl,
        );

        let transport_state = Arc::new(ControlPlaneState::new(
            store.clone(),
            sessions.clone(),
            tokens,
            config.transport.max_inbound_message_bytes,
        ));

        let registry = AgentRegistry::new(store.clone(), store.clone());
        let deployments = DeploymentEngine::new(store.clone(), store.clone(), store.clone());
        let control_api = ControlApi::new(
            registry,
            deployments,
            store.clone(),
            store,
            config.token.registration_token_ttl,
        );

        Ok(Self {
            transport_state,
            control_api,
            sessions,
        })
    }
}

fn load_signing_keys(paths: &[String]) -> Result<Vec<(String, Vec<u8>)>, ControlPlaneBuildError> {
    paths
        .iter()
        .enumerate()
        .map(|(index, path)| {
            let material = fs::read(path)
                .map_err(|err| ControlPlaneBuildError::KeyMaterial(path.clone(), err))?;
            Ok((format!("k{index}"), material))
        })
        .collect()
}

