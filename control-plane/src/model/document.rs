use super::ids::{DocumentId, OrganizationId};
use sha2::{Digest, Sha256};
use std::time::SystemTime;

/// An immutable configuration blob plus its content hash. `payload` is
/// opaque bytes at this boundary (treated as YAML text only where the
/// transport/diff code needs to parse it, ).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationDocument {
    pub doc_id: DocumentId,
    pub organization_id: OrganizationId,
    pub payload: Vec<u8>,
    pub hash: Vec<u8>,
    pub created_at: SystemTime,
    pub origin_ref: Option<String>,
    /// Detached signature over `hash`, forwarded opaquely to agents that
    /// understand the signature custom message (SPEC_FULL §2).
    pub signature: Option<Vec<u8>>,
}

impl ConfigurationDocument {
    /// `hash` is a pure function of `payload`; this is
    /// the one place that function is computed, so two documents with
    /// equal payload always end up sharing the same hash.
    pub fn hash_payload(payload: &[u8]) -> Vec<u8> {
        Sha256::digest(payload).to_vec()
    }

    pub fn new(
        organization_id: OrganizationId,
        payload: Vec<u8>,
        created_at: SystemTime,
        origin_ref: Option<String>,
    ) -> Self {
        let hash = Self::hash_payload(&payload);
        Self {
            doc_id: DocumentId::new(),
            organization_id,
            payload,
            hash,
            created_at,
            origin_ref,
            signature: None,
        }
    }

    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn hash_hex(&self) -> String {
        self.hash.iter().map(|b| format!("{b:02x}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_payloads_share_a_hash() {
        let org = OrganizationId::new("org-1");
        let a = ConfigurationDocument::new(org.clone(), b"same".to_vec(), SystemTime::now(), None);
        let b = ConfigurationDocument::new(org, b"same".to_vec(), SystemTime::now(), None);
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.doc_id, b.doc_id);
    }

    #[test]
    fn different_payloads_differ() {
        let org = OrganizationId::new("org-1");
        let a = ConfigurationDocument::new(org.clone(), b"one".to_vec(), SystemTime::now(), None);
        let b = ConfigurationDocument::new(org, b"two".to_vec(), SystemTime::now(), None);
        assert_ne!(a.hash, b.hash);
    }
}
