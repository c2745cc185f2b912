use thiserror::Error;

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("failed to build signing key: `{0}`")]
    KeyMaterial(String),

    #[error("failed to sign claims: `{0}`")]
    Sign(#[from] jsonwebtoken::errors::Error),

    #[error("token signature invalid or malformed")]
    Invalid,

    #[error("token expired")]
    Expired,

    #[error("no signing key with id `{0}` in the keyring")]
    UnknownKeyId(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationTokenError {
    #[error("registration token digest does not match")]
    DigestMismatch,

    #[error("malformed registration token encoding")]
    Malformed,
}
