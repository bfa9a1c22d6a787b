//! Capability tokens for the public accept-quote link.
//!
//! A token is derived from the inquiry id under a server secret and never
//! stored. It stays valid until the secret rotates; the workflow is what
//! stops a token from being used twice, by checking the inquiry status.

use secrecy::{ExposeSecret, Secret};
use service_core::error::AppError;
use service_core::utils::signature::{constant_time_eq, hmac_sha256_hex};
use uuid::Uuid;

/// Hex characters kept from the MAC.
pub const TOKEN_LENGTH: usize = 16;

#[derive(Clone)]
pub struct TokenVerifier {
    secret: Secret<String>,
}

impl TokenVerifier {
    pub fn new(secret: Secret<String>) -> Self {
        Self { secret }
    }

    pub fn token_for(&self, inquiry_id: Uuid) -> Result<String, AppError> {
        let mac = hmac_sha256_hex(
            self.secret.expose_secret().as_bytes(),
            inquiry_id.to_string().as_bytes(),
        )?;
        Ok(mac[..TOKEN_LENGTH].to_string())
    }

    pub fn verify(&self, inquiry_id: Uuid, supplied: &str) -> bool {
        match self.token_for(inquiry_id) {
            Ok(expected) => constant_time_eq(
                expected.as_bytes(),
                supplied.trim().to_ascii_lowercase().as_bytes(),
            ),
            Err(e) => {
                tracing::error!(error = %e, "Failed to derive accept token");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier(secret: &str) -> TokenVerifier {
        TokenVerifier::new(Secret::new(secret.to_string()))
    }

    #[test]
    fn token_is_short_hex_and_stable() {
        let v = verifier("accept-secret");
        let id = Uuid::new_v4();
        let token = v.token_for(id).unwrap();
        assert_eq!(token.len(), TOKEN_LENGTH);
        assert!(token.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_eq!(token, v.token_for(id).unwrap());
    }

    #[test]
    fn verifies_own_token_only() {
        let v = verifier("accept-secret");
        for _ in 0..50 {
            let id = Uuid::new_v4();
            let other = Uuid::new_v4();
            assert!(v.verify(id, &v.token_for(id).unwrap()));
            assert!(!v.verify(id, &v.token_for(other).unwrap()));
        }
    }

    #[test]
    fn rejects_tampered_or_foreign_tokens() {
        let id = Uuid::new_v4();
        let token = verifier("accept-secret").token_for(id).unwrap();
        assert!(!verifier("rotated-secret").verify(id, &token));
        assert!(!verifier("accept-secret").verify(id, &token[..TOKEN_LENGTH - 1]));
        assert!(!verifier("accept-secret").verify(id, ""));
        assert!(verifier("accept-secret").verify(id, &token.to_uppercase()));
    }
}
