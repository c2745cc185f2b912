use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("no row for key `{0}`")]
    NotFound(String),

    #[error("compare-and-swap failed: row was updated concurrently")]
    Conflict,

    #[error("backing store unavailable: `{0}`")]
    Unavailable(String),
}
