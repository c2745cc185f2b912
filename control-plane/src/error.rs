//! Domain error kinds. Each module owns a narrower error enum for
//! its own fallible operations; this is the aggregate surfaced at the
//! Control API boundary, using per-domain `#[from]` aggregation rather
//! than one flat error type for the whole crate.

use crate::deployment::DeploymentError;
use crate::registry::RegistryError;
use crate::session::SessionError;
use crate::token::TokenError;
use thiserror::Error;

/// Default `Retry-After` advertised to a caller rejected for exceeding a
/// resource cap (`max_sessions`, a full non-supersedable outbound queue).
pub const OVERLOAD_RETRY_AFTER_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum ControlPlaneError {
    #[error("authentication failed: `{0}`")]
    Auth(#[from] TokenError),

    #[error("registry error: `{0}`")]
    Registry(#[from] RegistryError),

    #[error("deployment error: `{0}`")]
    Deployment(#[from] DeploymentError),

    #[error("session error: `{0}`")]
    Session(#[from] SessionError),

    #[error("wire format error: `{0}`")]
    Wire(#[from] flowgate_wire::WireFormatError),

    #[error("resource cap exceeded, retry after {retry_after_secs}s")]
    Overloaded { retry_after_secs: u64 },

    #[error("config request ticket `{0}` expired before the agent reported")]
    TicketExpired(String),

    #[error("organization `{requested}` does not match resource organization")]
    OrganizationMismatch { requested: String },
}
