//! HMAC signing for content distribution.
//!
//! Notifications to subscribers that supplied a `hub.secret` carry an
//! `X-Hub-Signature` header of the form `{algorithm}={hex-hmac}`, computed over
//! the raw notification body.

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use crate::error::{HubError, Result};

/// Header carrying the payload signature.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature";

/// Supported keyed-hash algorithms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Algorithm {
    Sha1,
    Sha256,
    Sha384,
    #[default]
    Sha512,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha1 => "sha1",
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(Algorithm::Sha1),
            "sha256" => Ok(Algorithm::Sha256),
            "sha384" => Ok(Algorithm::Sha384),
            "sha512" => Ok(Algorithm::Sha512),
            _ => Err(HubError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

impl TryFrom<String> for Algorithm {
    type Error = HubError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Algorithm> for String {
    fn from(value: Algorithm) -> Self {
        value.as_str().to_string()
    }
}

fn hmac_hex<M: Mac + hmac::digest::KeyInit>(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = <M as Mac>::new_from_slice(secret).unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// HMAC of `payload` keyed by `secret`, rendered as lowercase hex.
pub fn sign(algorithm: Algorithm, secret: &[u8], payload: &[u8]) -> String {
    match algorithm {
        Algorithm::Sha1 => hmac_hex::<Hmac<Sha1>>(secret, payload),
        Algorithm::Sha256 => hmac_hex::<Hmac<Sha256>>(secret, payload),
        Algorithm::Sha384 => hmac_hex::<Hmac<Sha384>>(secret, payload),
        Algorithm::Sha512 => hmac_hex::<Hmac<Sha512>>(secret, payload),
    }
}

/// Like [`sign`], selecting the algorithm by name.
pub fn sign_named(algorithm: &str, secret: &[u8], payload: &[u8]) -> Result<String> {
    Ok(sign(algorithm.parse()?, secret, payload))
}

/// Value for the [`SIGNATURE_HEADER`] header.
pub fn signature_header(algorithm: Algorithm, secret: &[u8], payload: &[u8]) -> String {
    format!("{}={}", algorithm, sign(algorithm, secret, payload))
}

/// Verify a `{algorithm}={hex}` header value against a payload.
pub fn verify_signature(header: &str, secret: &[u8], payload: &[u8]) -> bool {
    let Some((name, digest)) = header.split_once('=') else {
        return false;
    };
    let Ok(algorithm) = name.parse::<Algorithm>() else {
        return false;
    };

    let expected = sign(algorithm, secret, payload);
    constant_time_eq(expected.as_bytes(), digest.to_ascii_lowercase().as_bytes())
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_oracle() {
        assert_eq!(
            sign(Algorithm::Sha256, b"s3cr3t", b"update"),
            "51a82781f397ffeb9a8b21d63b7058fce4c3109a1812b9b3a21d979976b09b90"
        );
    }

    #[test]
    fn test_known_vectors_per_algorithm() {
        let fox = b"The quick brown fox jumps over the lazy dog";
        assert_eq!(sign(Algorithm::Sha1, b"key", fox), "de7c9b85b8b78aa6bc8a7a36f70a90701c9db4d9");
        assert_eq!(
            sign(Algorithm::Sha256, b"key", fox),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );

        // RFC 4231 test case 1
        let key = [0x0bu8; 20];
        assert_eq!(
            sign(Algorithm::Sha256, &key, b"Hi There"),
            "b0344c61d8db38535ca8afceaf0bf12b881dc200c9833da726e9376c2e32cff7"
        );
        assert_eq!(
            sign(Algorithm::Sha384, &key, b"Hi There"),
            "afd03944d84895626b0825f4ab46907f15f9dadbe4101ec682aa034c7cebc59cfaea9ea9076ede7f4af152e8b2fa9cb6"
        );
        assert_eq!(
            sign(Algorithm::Sha512, &key, b"Hi There"),
            "87aa7cdea5ef619d4ff0b4241a1d6cb02379f4e2ce4ec2787ad0b30545e17cdedaa833b7d6b8a702038b274eaea3f4e4be9d914eeb61f1702e696c203a126854"
        );

        // RFC 4231 test case 2
        assert_eq!(
            sign(Algorithm::Sha256, b"Jefe", b"what do ya want for nothing?"),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_deterministic_and_sensitive_to_payload() {
        for algorithm in [Algorithm::Sha1, Algorithm::Sha256, Algorithm::Sha384, Algorithm::Sha512] {
            let first = sign(algorithm, b"s3cr3t", b"update");
            let second = sign(algorithm, b"s3cr3t", b"update");
            assert_eq!(first, second);
            assert_ne!(first, sign(algorithm, b"s3cr3t", b"updatf"));
            assert!(first.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        }
    }

    #[test]
    fn test_algorithm_names() {
        assert_eq!("sha1".parse::<Algorithm>().unwrap(), Algorithm::Sha1);
        assert_eq!("SHA512".parse::<Algorithm>().unwrap(), Algorithm::Sha512);
        assert!(matches!("md5".parse::<Algorithm>(), Err(HubError::UnsupportedAlgorithm(name)) if name == "md5"));
        assert!(matches!(sign_named("whirlpool", b"k", b"p"), Err(HubError::UnsupportedAlgorithm(_))));
        assert_eq!(
            sign_named("sha256", b"s3cr3t", b"update").unwrap(),
            sign(Algorithm::Sha256, b"s3cr3t", b"update")
        );
    }

    #[test]
    fn test_header_and_verify() {
        let header = signature_header(Algorithm::Sha256, b"s3cr3t", b"update");
        assert_eq!(
            header,
            "sha256=51a82781f397ffeb9a8b21d63b7058fce4c3109a1812b9b3a21d979976b09b90"
        );

        assert!(verify_signature(&header, b"s3cr3t", b"update"));
        assert!(!verify_signature(&header, b"s3cr3t", b"updatf"));
        assert!(!verify_signature(&header, b"other", b"update"));
        assert!(!verify_signature("no-separator", b"s3cr3t", b"update"));
        assert!(!verify_signature("md5=abc", b"s3cr3t", b"update"));
    }
}
