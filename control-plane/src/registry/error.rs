use crate::persistence::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no agent registered for this identifier")]
    NotFound,

    #[error("instance_uid is already registered to a different agent")]
    AlreadyRegistered,

    #[error("registry update lost the compare-and-swap race after {attempts} attempts")]
    Conflict { attempts: u32 },

    #[error("persistence failure: `{0}`")]
    Store(#[from] StoreError),
}
