use thiserror::Error;

/// Errors raised while turning wire bytes into structured OpAMP messages, or
/// the reverse. Decode failures never produce a partial record: a frame
/// either decodes in full or `decode_agent_to_server` returns one of these.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireFormatError {
    #[error("malformed protobuf frame: `{0}`")]
    Malformed(String),

    #[error("instance_uid must be exactly 16 bytes, got {0}")]
    InstanceUidLength(usize),

    #[error("required field `{0}` missing from frame")]
    MissingField(&'static str),

    #[error("frame exceeds maximum inbound message size ({actual} > {max})")]
    TooLarge { actual: usize, max: usize },
}
