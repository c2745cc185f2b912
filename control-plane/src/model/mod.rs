//! Core domain entities, independent of how they're persisted or
//! exchanged on the wire.

mod agent;
mod deployment;
mod document;
mod ids;
mod session;
mod ticket;

pub use agent::{Agent, AgentHealth, ManagementMode, RegistrationState, RemoteConfigStatus};
pub use deployment::{
    AgentDeploymentStatus, Deployment, DeploymentPhase, DeploymentState, RolloutStrategy,
    TargetingPredicate,
};
pub use document::ConfigurationDocument;
pub use ids::{AgentId, DeploymentId, DocumentId, OrganizationId, TicketId};
pub use session::{SessionId, Transport};
pub use ticket::{ConfigRequestTicket, TicketState};
