use crate::claims::{AgentClaims, TokenKind};
use crate::error::JwtError;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};

struct SigningKey {
    key_id: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

/// An ordered set of HMAC signing keys. New tokens are always signed with
/// the newest (last-inserted) key; verification accepts a signature from
/// any key still present, which is what makes key rotation non-disruptive.
/// Retiring a key
/// is just never re-adding it on the next build of the keyring — there is
/// no explicit "revoke" here because retired keys are dropped by whoever
/// constructs the keyring from config, not mutated in place.
pub struct SigningKeyring {
    keys: Vec<SigningKey>,
    algorithm: Algorithm,
}

impl SigningKeyring {
    /// Builds a keyring from secrets ordered oldest-first; the last entry
    /// is the active signing key.
    pub fn new(keys_oldest_first: Vec<(String, Vec<u8>)>) -> Result<Self, JwtError> {
        if keys_oldest_first.is_empty() {
            return Err(JwtError::KeyMaterial(
                "signing keyring requires at least one key".to_string(),
            ));
        }
        let algorithm = Algorithm::HS256;
        let keys = keys_oldest_first
            .into_iter()
            .map(|(key_id, secret)| SigningKey {
                key_id,
                encoding_key: EncodingKey::from_secret(&secret),
                decoding_key: DecodingKey::from_secret(&secret),
            })
            .collect();
        Ok(Self { keys, algorithm })
    }

    fn active_key(&self) -> &SigningKey {
        self.keys.last().expect("keyring is never empty")
    }

    pub fn sign(&self, claims: &AgentClaims) -> Result<String, JwtError> {
        let key = self.active_key();
        let mut header = Header::new(self.algorithm);
        header.kid = Some(key.key_id.clone());
        Ok(jsonwebtoken::encode(&header, claims, &key.encoding_key)?)
    }

    /// Verifies a token's signature and required-claim shape only. Expiry,
    /// `kind`, `agent_id` existence, and organization match are layered on
    /// top by the control plane's Token Service; this method
    /// collapses all signature-level problems into `JwtError::Invalid` and
    /// expiry into `JwtError::Expired`.
    pub fn verify(&self, token: &str) -> Result<AgentClaims, JwtError> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| JwtError::Invalid)?;

        let candidates: Vec<&SigningKey> = match &header.kid {
            Some(kid) => self.keys.iter().filter(|k| &k.key_id == kid).collect(),
            None => self.keys.iter().collect(),
        };
        if candidates.is_empty() {
            return Err(JwtError::Invalid);
        }

        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;

        let mut saw_expired = false;
        for key in candidates {
            match jsonwebtoken::decode::<AgentClaims>(token, &key.decoding_key, &validation) {
                Ok(data) => {
                    if data.claims.kind != TokenKind::Agent {
                        return Err(JwtError::Invalid);
                    }
                    return Ok(data.claims);
                }
                Err(err) => {
                    if matches!(
                        err.kind(),
                        jsonwebtoken::errors::ErrorKind::ExpiredSignature
                    ) {
                        saw_expired = true;
                    }
                }
            }
        }

        if saw_expired {
            Err(JwtError::Expired)
        } else {
            Err(JwtError::Invalid)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyring() -> SigningKeyring {
        SigningKeyring::new(vec![
            ("k1".into(), b"first-secret".to_vec()),
            ("k2".into(), b"second-secret".to_vec()),
        ])
        .unwrap()
    }

    #[test]
    fn signs_with_newest_key_and_verifies() {
        let ring = keyring();
        let claims = AgentClaims::new("agent-1".into(), "org-1".into(), 0, 9_999_999_999);
        let token = ring.sign(&claims).unwrap();

        let verified = ring.verify(&token).unwrap();
        assert_eq!(verified.agent_id, "agent-1");
    }

    #[test]
    fn verifies_tokens_signed_by_a_retired_but_still_present_key() {
        let old_ring = SigningKeyring::new(vec![("k1".into(), b"first-secret".to_vec())]).unwrap();
        let claims = AgentClaims::new("agent-1".into(), "org-1".into(), 0, 9_999_999_999);
        let token = old_ring.sign(&claims).unwrap();

        let rotated_ring = keyring();
        assert!(rotated_ring.verify(&token).is_ok());
    }

    #[test]
    fn rejects_token_signed_by_a_key_outside_the_ring() {
        let foreign_ring =
            SigningKeyring::new(vec![("kx".into(), b"not-in-ring".to_vec())]).unwrap();
        let claims = AgentClaims::new("agent-1".into(), "org-1".into(), 0, 9_999_999_999);
        let token = foreign_ring.sign(&claims).unwrap();

        let ring = keyring();
        assert!(matches!(ring.verify(&token), Err(JwtError::Invalid)));
    }

    #[test]
    fn rejects_expired_token() {
        let ring = keyring();
        let claims = AgentClaims::new("agent-1".into(), "org-1".into(), 0, 1);
        let token = ring.sign(&claims).unwrap();

        assert!(matches!(ring.verify(&token), Err(JwtError::Expired)));
    }
}
