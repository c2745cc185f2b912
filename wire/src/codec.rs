//! Encode/decode between the protobuf wire format and the structured
//! records the rest of the control plane works with.
//!
//! Decoding never produces a partial record: any framing or required-field
//! violation fails the whole call with [`WireFormatError`] before anything
//! is returned to the caller. Encoding is deterministic — the same value
//! always produces the same bytes, since prost serializes map fields by a
//! btree-ordered internal representation.

use crate::error::WireFormatError;
use crate::proto;
use crate::types::{ConfigHash, InstanceUid};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDescription {
    pub identifying_attributes: HashMap<String, String>,
    pub non_identifying_attributes: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub config_map: HashMap<String, Vec<u8>>,
    pub hash: ConfigHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteConfigApplyStatus {
    Unset,
    Applying,
    Applied,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfigStatusReport {
    pub status: RemoteConfigApplyStatus,
    pub last_remote_config_hash: ConfigHash,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentHealth {
    pub healthy: bool,
    pub start_time_unix_nano: u64,
    pub last_error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackageStatus {
    pub name: String,
    pub version: String,
    pub installed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentToServer {
    pub instance_uid: InstanceUid,
    pub sequence_num: u64,
    pub capabilities: u64,
    pub agent_description: Option<AgentDescription>,
    pub effective_config: Option<EffectiveConfig>,
    pub remote_config_status: Option<RemoteConfigStatusReport>,
    pub health: Option<AgentHealth>,
    pub available_components: Option<Vec<String>>,
    pub package_statuses: Vec<PackageStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteConfigOffer {
    pub config_map: HashMap<String, Vec<u8>>,
    pub hash: ConfigHash,
    pub signature: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorResponseType {
    Unknown,
    BadRequest,
    Unavailable,
    InternalError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerErrorResponse {
    pub r#type: ErrorResponseType,
    pub message: String,
    pub retry_after_nanoseconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandType {
    Restart,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerToAgent {
    pub instance_uid: InstanceUid,
    pub capabilities: u64,
    pub remote_config: Option<RemoteConfigOffer>,
    pub error_response: Option<ServerErrorResponse>,
    pub command: Option<CommandType>,
    pub flags: u64,
}

/// Bit set on [`ServerToAgent::flags`] telling the agent more outbound
/// messages are already queued (used by the poll transport).
pub const FLAG_MORE_AVAILABLE: u64 = 0x1;
/// Bit requesting the agent report its effective configuration on the next
/// message, driven by a pending [`ConfigRequestTicket`].
pub const FLAG_REPORT_EFFECTIVE_CONFIG: u64 = 0x2;

pub fn decode_agent_to_server(
    bytes: &[u8],
    max_size: usize,
) -> Result<AgentToServer, WireFormatError> {
    if bytes.len() > max_size {
        return Err(WireFormatError::TooLarge {
            actual: bytes.len(),
            max: max_size,
        });
    }

    let wire: proto::AgentToServer = prost::Message::decode(bytes)
        .map_err(|err| WireFormatError::Malformed(err.to_string()))?;

    let instance_uid = InstanceUid::from_bytes(&wire.instance_uid)?;

    let agent_description = wire.agent_description.map(|d| AgentDescription {
        identifying_attributes: d.identifying_attributes,
        non_identifying_attributes: d.non_identifying_attributes,
    });

    let effective_config = wire.effective_config.map(|c| EffectiveConfig {
        config_map: c.config_map,
        hash: ConfigHash(c.hash),
    });

    let remote_config_status = wire.remote_config_status.map(|s| RemoteConfigStatusReport {
        status: decode_apply_status(s.status),
        last_remote_config_hash: ConfigHash(s.last_remote_config_hash),
        error_message: s.error_message,
    });

    let health = wire.health.map(|h| AgentHealth {
        healthy: h.healthy,
        start_time_unix_nano: h.start_time_unix_nano,
        last_error: h.last_error,
    });

    let available_components = wire
        .available_components
        .map(|a| a.component_types);

    let package_statuses = wire
        .package_statuses
        .into_iter()
        .map(|p| PackageStatus {
            name: p.name,
            version: p.version,
            installed: p.installed,
        })
        .collect();

    Ok(AgentToServer {
        instance_uid,
        sequence_num: wire.sequence_num,
        capabilities: wire.capabilities,
        agent_description,
        effective_config,
        remote_config_status,
        health,
        available_components,
        package_statuses,
    })
}

pub fn encode_server_to_agent(msg: &ServerToAgent) -> Result<Vec<u8>, WireFormatError> {
    let wire = proto::ServerToAgent {
        instance_uid: msg.instance_uid.to_vec(),
        capabilities: msg.capabilities,
        remote_config: msg.remote_config.as_ref().map(|c| proto::AgentRemoteConfig {
            config_map: c.config_map.clone(),
            hash: c.hash.0.clone(),
            signature: c.signature.clone(),
        }),
        error_response: msg.error_response.as_ref().map(|e| proto::ServerErrorResponse {
            r#type: encode_error_type(e.r#type) as i32,
            message: e.message.clone(),
            retry_after_nanoseconds: e.retry_after_nanoseconds,
        }),
        command: msg.command.map(|c| proto::ServerToAgentCommand {
            r#type: encode_command_type(c) as i32,
        }),
        flags: msg.flags,
    };

    Ok(prost::Message::encode_to_vec(&wire))
}

fn decode_apply_status(raw: i32) -> RemoteConfigApplyStatus {
    match proto::RemoteConfigApplyStatus::try_from(raw)
        .unwrap_or(proto::RemoteConfigApplyStatus::Unset)
    {
        proto::RemoteConfigApplyStatus::Unset => RemoteConfigApplyStatus::Unset,
        proto::RemoteConfigApplyStatus::Applying => RemoteConfigApplyStatus::Applying,
        proto::RemoteConfigApplyStatus::Applied => RemoteConfigApplyStatus::Applied,
        proto::RemoteConfigApplyStatus::Failed => RemoteConfigApplyStatus::Failed,
    }
}

fn encode_error_type(t: ErrorResponseType) -> proto::ErrorResponseType {
    match t {
        ErrorResponseType::Unknown => proto::ErrorResponseType::Unknown,
        ErrorResponseType::BadRequest => proto::ErrorResponseType::BadRequest,
        ErrorResponseType::Unavailable => proto::ErrorResponseType::Unavailable,
        ErrorResponseType::InternalError => proto::ErrorResponseType::InternalError,
    }
}

fn encode_command_type(t: CommandType) -> proto::CommandType {
    match t {
        CommandType::Restart => proto::CommandType::Restart,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_instance_uid() -> InstanceUid {
        InstanceUid::from_bytes(&[0x01; 16]).unwrap()
    }

    #[test]
    fn decode_rejects_short_instance_uid() {
        let wire = proto::AgentToServer {
            instance_uid: vec![1, 2, 3],
            ..Default::default()
        };
        let bytes = prost::Message::encode_to_vec(&wire);
        let err = decode_agent_to_server(&bytes, 1 << 20).unwrap_err();
        assert_eq!(err, WireFormatError::InstanceUidLength(3));
    }

    #[test]
    fn decode_rejects_oversized_frames() {
        let err = decode_agent_to_server(&[0u8; 16], 4).unwrap_err();
        assert_eq!(err, WireFormatError::TooLarge { actual: 16, max: 4 });
    }

    #[test]
    fn decode_ignores_unknown_fields() {
        // A frame with an extra, unrecognized field number should still
        // decode cleanly (forward compatibility).
        let mut bytes = prost::Message::encode_to_vec(&proto::AgentToServer {
            instance_uid: sample_instance_uid().to_vec(),
            sequence_num: 7,
            ..Default::default()
        });
        // Field 99, varint wire type, value 1: tag = (99 << 3) | 0 = 792
        prost::encoding::encode_varint(792, &mut bytes);
        prost::encoding::encode_varint(1, &mut bytes);

        let decoded = decode_agent_to_server(&bytes, 1 << 20).unwrap();
        assert_eq!(decoded.sequence_num, 7);
    }

    #[test]
    fn encode_decode_round_trip() {
        let msg = ServerToAgent {
            instance_uid: sample_instance_uid(),
            capabilities: 0x7DE7,
            remote_config: Some(RemoteConfigOffer {
                config_map: HashMap::from([("collector.yaml".to_string(), b"x: 1".to_vec())]),
                hash: ConfigHash(b"HASH".to_vec()),
                signature: vec![],
            }),
            error_response: None,
            command: None,
            flags: FLAG_MORE_AVAILABLE,
        };

        let bytes = encode_server_to_agent(&msg).unwrap();
        let wire: proto::ServerToAgent = prost::Message::decode(bytes.as_slice()).unwrap();
        assert_eq!(wire.instance_uid, msg.instance_uid.to_vec());
        assert_eq!(wire.capabilities, 0x7DE7);
        assert_eq!(wire.flags, FLAG_MORE_AVAILABLE);
    }

    #[test]
    fn encode_is_deterministic() {
        let msg = ServerToAgent {
            instance_uid: sample_instance_uid(),
            capabilities: 1,
            remote_config: None,
            error_response: None,
            command: None,
            flags: 0,
        };
        assert_eq!(
            encode_server_to_agent(&msg).unwrap(),
            encode_server_to_agent(&msg).unwrap()
        );
    }
}
