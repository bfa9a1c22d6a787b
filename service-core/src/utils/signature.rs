use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `payload` under `secret`.
pub fn hmac_sha256_hex(secret: &[u8], payload: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Byte comparison whose running time does not depend on where the inputs
/// first differ. Inputs of different length compare unequal.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Verify a hex HMAC-SHA256 signature using constant-time comparison.
///
/// Hex case is normalised before comparing, since providers are not
/// consistent about it.
pub fn verify_hmac_hex(
    secret: &[u8],
    payload: &[u8],
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let expected = hmac_sha256_hex(secret, payload)?;
    let supplied = signature.trim().to_ascii_lowercase();
    Ok(constant_time_eq(expected.as_bytes(), supplied.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_generation_and_verification() {
        let secret = b"whsec_test";
        let payload = br#"1700000000.{"id":"evt_1"}"#;

        let signature = hmac_sha256_hex(secret, payload).unwrap();
        assert_eq!(signature.len(), 64);
        assert!(verify_hmac_hex(secret, payload, &signature).unwrap());
        assert!(verify_hmac_hex(secret, payload, &signature.to_uppercase()).unwrap());
    }

    #[test]
    fn test_invalid_signature() {
        let secret = b"whsec_test";
        let payload = b"payload";

        let signature = hmac_sha256_hex(secret, payload).unwrap();
        let flipped = format!("{}{}", if signature.starts_with('a') { 'b' } else { 'a' }, &signature[1..]);

        assert!(!verify_hmac_hex(secret, payload, &flipped).unwrap());
        assert!(!verify_hmac_hex(secret, payload, "").unwrap());
        assert!(!verify_hmac_hex(b"other", payload, &signature).unwrap());
    }

    #[test]
    fn test_tampered_body() {
        let secret = b"whsec_test";
        let signature = hmac_sha256_hex(secret, br#"{"amount":100}"#).unwrap();
        assert!(!verify_hmac_hex(secret, br#"{"amount":900}"#, &signature).unwrap());
    }

    #[test]
    fn test_constant_time_eq_lengths() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(!constant_time_eq(b"abc", b"abd"));
    }
}
