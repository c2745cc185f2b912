use crate::error::WireFormatError;
use std::fmt;

/// The 16-byte opaque identifier an agent picks for the life of its
/// installation. Always rendered as exactly 16 bytes on the wire; shorter
/// values are a decode error rather than being zero-padded, so a truncated
/// frame can never be silently accepted as a different agent's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceUid([u8; 16]);

impl InstanceUid {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireFormatError> {
        let array: [u8; 16] = bytes
            .try_into()
            .map_err(|_| WireFormatError::InstanceUidLength(bytes.len()))?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl fmt::Display for InstanceUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// A content hash over a configuration blob, rendered as hex where a string
/// is required. Kept as raw bytes on the wire path; hex
/// rendering happens only at API/log boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ConfigHash(pub Vec<u8>);

impl ConfigHash {
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_uid_rejects_short_values() {
        let err = InstanceUid::from_bytes(&[1, 2, 3]).unwrap_err();
        assert_eq!(err, WireFormatError::InstanceUidLength(3));
    }

    #[test]
    fn instance_uid_round_trips() {
        let bytes = [0xAB; 16];
        let uid = InstanceUid::from_bytes(&bytes).unwrap();
        assert_eq!(uid.as_bytes(), &bytes);
        assert_eq!(uid.to_string(), "ab".repeat(16));
    }

    #[test]
    fn config_hash_hex_rendering() {
        let hash = ConfigHash(vec![0x0f, 0xa0]);
        assert_eq!(hash.to_hex(), "0fa0");
    }
}
