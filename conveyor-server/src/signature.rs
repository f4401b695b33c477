//! Webhook signature verification
//!
//! Recomputes the HMAC-SHA256 of the exact raw body under the shared secret
//! and compares it to the signature header in constant time. A pure gate:
//! rejected deliveries are logged by the caller and discarded, no build
//! request is ever created from them.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

/// Header carrying the hex HMAC, GitHub convention: `sha256=<hex>`
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("missing signature header")]
    MissingHeader,

    #[error("malformed signature header")]
    Malformed,

    #[error("signature mismatch")]
    Mismatch,
}

/// Verifies the signature header against the raw request body
pub fn verify(secret: &str, body: &[u8], header: Option<&str>) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::MissingHeader)?;
    let signature_hex = header
        .strip_prefix("sha256=")
        .ok_or(SignatureError::Malformed)?;
    let signature = hex::decode(signature_hex).map_err(|_| SignatureError::Malformed)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC takes any key length");
    mac.update(body);
    // verify_slice is the constant-time comparison
    mac.verify_slice(&signature)
        .map_err(|_| SignatureError::Mismatch)
}

/// Computes the signature header value for a body
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC takes any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "It's a Secret to Everybody";
    const BODY: &[u8] = b"Hello, World!";

    #[test]
    fn test_valid_signature_accepted() {
        let header = sign(SECRET, BODY);
        assert_eq!(verify(SECRET, BODY, Some(&header)), Ok(()));
    }

    #[test]
    fn test_known_vector() {
        // from the GitHub webhook documentation
        assert_eq!(
            sign(SECRET, BODY),
            "sha256=757107ea0eb2509fc211221cce984b8a37570b6d7586c22c46f4379c8b043e17"
        );
    }

    #[test]
    fn test_mutated_body_rejected() {
        let header = sign(SECRET, BODY);
        assert_eq!(
            verify(SECRET, b"Hello, World?", Some(&header)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_mutated_secret_rejected() {
        let header = sign(SECRET, BODY);
        assert_eq!(
            verify("a different secret", BODY, Some(&header)),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_missing_header_rejected() {
        assert_eq!(verify(SECRET, BODY, None), Err(SignatureError::MissingHeader));
    }

    #[test]
    fn test_wrong_prefix_rejected() {
        assert_eq!(
            verify(SECRET, BODY, Some("sha1=abcdef")),
            Err(SignatureError::Malformed)
        );
    }

    #[test]
    fn test_non_hex_signature_rejected() {
        assert_eq!(
            verify(SECRET, BODY, Some("sha256=not-hex!")),
            Err(SignatureError::Malformed)
        );
    }
}
