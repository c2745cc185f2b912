//! Binary wire codec for the OpAMP control plane.
//!
//! This is the single source of truth for OpAMP field semantics and
//! capability bit-field layout. Nothing outside this crate should construct
//! or inspect the generated protobuf types directly; callers go through
//! [`codec::encode_server_to_agent`] / [`codec::decode_agent_to_server`] and
//! the ergonomic newtypes in [`types`].

pub mod codec;
pub mod error;
pub mod types;

/// Generated protobuf message types. Kept internal: every field accepted
/// from the wire has to pass through [`types`] to become a domain value.
#[allow(clippy::all)]
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/flowgate.opamp.rs"));
}

pub use codec::{decode_agent_to_server, encode_server_to_agent};
pub use error::WireFormatError;
pub use types::{ConfigHash, InstanceUid};
