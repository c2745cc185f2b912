//! Cryptographic primitives behind the FlowGate Token Service:
//! signed-claim agent tokens and salted-digest registration tokens.
//!
//! This crate only deals with bytes and signatures. Organization scoping,
//! single-use bookkeeping, and the `agent_id` existence check are the
//! control plane's job (see `control-plane/src/token.rs`), which is why
//! those checks aren't modeled here.

pub mod claims;
pub mod error;
pub mod keyring;
pub mod registration_token;

pub use claims::AgentClaims;
pub use error::{JwtError, RegistrationTokenError};
pub use keyring::SigningKeyring;
