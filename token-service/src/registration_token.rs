//! One-time registration tokens: 48 random bytes, presented to
//! the agent as URL-safe base64, stored server-side only as a salted digest.

use crate::error::RegistrationTokenError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

const TOKEN_BYTES: usize = 48;
const SALT_BYTES: usize = 16;

/// The plain-text token value. Returned exactly once, at creation time;
/// never persisted in this form.
pub struct PlainRegistrationToken(String);

impl PlainRegistrationToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What actually gets persisted: a salt and the digest of `salt || token`.
/// Two calls to [`generate`] never collide because both the token and the
/// salt are freshly drawn from the OS RNG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationTokenDigest {
    pub salt: [u8; SALT_BYTES],
    pub digest: [u8; 32],
}

pub fn generate() -> (PlainRegistrationToken, RegistrationTokenDigest) {
    let mut rng = rand::thread_rng();

    let mut token_bytes = [0u8; TOKEN_BYTES];
    rng.fill_bytes(&mut token_bytes);
    let plain = URL_SAFE_NO_PAD.encode(token_bytes);

    let mut salt = [0u8; SALT_BYTES];
    rng.fill_bytes(&mut salt);
    let digest = digest_of(&salt, &plain);

    (
        PlainRegistrationToken(plain),
        RegistrationTokenDigest { salt, digest },
    )
}

/// Verifies `presented` (the base64 string an agent sent) against a stored
/// digest using a constant-time comparison, so a timing side channel can't
/// be used to brute-force the digest byte by byte.
pub fn verify(
    presented: &str,
    stored: &RegistrationTokenDigest,
) -> Result<(), RegistrationTokenError> {
    if URL_SAFE_NO_PAD.decode(presented).is_err() {
        return Err(RegistrationTokenError::Malformed);
    }

    let candidate = digest_of(&stored.salt, presented);
    if candidate.ct_eq(&stored.digest).into() {
        Ok(())
    } else {
        Err(RegistrationTokenError::DigestMismatch)
    }
}

fn digest_of(salt: &[u8], token: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(token.as_bytes());
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_token_verifies_against_its_own_digest() {
        let (plain, stored) = generate();
        assert!(verify(plain.as_str(), &stored).is_ok());
    }

    #[test]
    fn tampered_token_fails_verification() {
        let (plain, stored) = generate();
        let tampered = format!("{}x", &plain.as_str()[..plain.as_str().len() - 1]);
        assert_eq!(
            verify(&tampered, &stored),
            Err(RegistrationTokenError::DigestMismatch)
        );
    }

    #[test]
    fn malformed_base64_is_rejected() {
        let (_, stored) = generate();
        assert_eq!(
            verify("not base64!!", &stored),
            Err(RegistrationTokenError::Malformed)
        );
    }

    #[test]
    fn two_generated_tokens_never_collide() {
        let (a, _) = generate();
        let (b, _) = generate();
        assert_ne!(a.as_str(), b.as_str());
    }
}
