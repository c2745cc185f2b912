use crate::persistence::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("no deployment with this id")]
    NotFound,

    #[error("deployment precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("persistence failure: `{0}`")]
    Store(#[from] StoreError),
}
