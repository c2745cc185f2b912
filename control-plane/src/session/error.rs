use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no active session for this instance_uid")]
    NotFound,

    #[error("outbound queue is full and the message cannot be superseded or dropped")]
    Overloaded,
}
