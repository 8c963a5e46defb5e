//! Signature providers
//!
//! The core never hard-codes a signature primitive. A [`SignatureProvider`]
//! is handed to the host through its options, and the registry records which
//! algorithm and public key belong to each package.

use crate::trust::error::SignatureError;
use crate::trust::hasher::{compute_hmac, verify_hmac};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Signs bytes and checks signatures over bytes
pub trait SignatureProvider: Send + Sync {
    /// Algorithm implemented by this provider
    fn algorithm(&self) -> SignatureAlgorithm;

    /// Produce a signature for the data
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SignatureError>;

    /// Check a signature against the data
    fn verify(&self, data: &[u8], signature: &[u8]) -> bool;
}

/// Signature algorithms known to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    #[serde(rename = "ed25519")]
    Ed25519,
    #[serde(rename = "hmac-sha256")]
    HmacSha256,
}

impl SignatureAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Ed25519 => "ed25519",
            SignatureAlgorithm::HmacSha256 => "hmac-sha256",
        }
    }

    /// Build a verifying provider from an encoded key
    ///
    /// For Ed25519 the key is the Base64url public key; for HMAC it is the
    /// Base64url shared secret.
    pub fn provider(&self, key: &str) -> Result<Arc<dyn SignatureProvider>, SignatureError> {
        match self {
            SignatureAlgorithm::Ed25519 => Ok(Arc::new(Ed25519Provider::from_public_key(key)?)),
            SignatureAlgorithm::HmacSha256 => {
                let secret = decode_signature(key)
                    .ok_or_else(|| SignatureError::InvalidKey("secret is not Base64url".into()))?;
                Ok(Arc::new(HmacSha256Provider::new(secret)?))
            }
        }
    }
}

impl std::fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SignatureAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ed25519" => Ok(SignatureAlgorithm::Ed25519),
            "hmac-sha256" | "hmac" => Ok(SignatureAlgorithm::HmacSha256),
            _ => Err(format!(
                "Unknown signature algorithm: '{s}'. Valid options: ed25519, hmac-sha256"
            )),
        }
    }
}

/// Encode signature bytes as Base64url without padding
pub fn encode_signature(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a Base64url signature, padded or not
pub fn decode_signature(encoded: &str) -> Option<Vec<u8>> {
    let trimmed = encoded.trim();
    URL_SAFE_NO_PAD
        .decode(trimmed.trim_end_matches('='))
        .or_else(|_| URL_SAFE.decode(trimmed))
        .ok()
}

/// Encoded Ed25519 key pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyPair {
    /// Base64url 32-byte public key
    pub public_key: String,
    /// Base64url 32-byte secret seed
    pub secret_key: String,
}

/// Ed25519 provider; verify-only unless a signing key is loaded
pub struct Ed25519Provider {
    verifying: VerifyingKey,
    signing: Option<SigningKey>,
}

impl Ed25519Provider {
    /// Generate a fresh key pair
    pub fn generate() -> (Self, KeyPair) {
        let signing = SigningKey::generate(&mut rand::rngs::OsRng);
        let pair = KeyPair {
            public_key: encode_signature(signing.verifying_key().as_bytes()),
            secret_key: encode_signature(&signing.to_bytes()),
        };
        (Self::from_signing(signing), pair)
    }

    /// Verify-only provider from a Base64url public key
    pub fn from_public_key(encoded: &str) -> Result<Self, SignatureError> {
        let bytes: [u8; 32] = decode_key(encoded, "public key")?;
        let verifying = VerifyingKey::from_bytes(&bytes)
            .map_err(|_| SignatureError::InvalidKey("not a valid Ed25519 public key".into()))?;
        Ok(Self {
            verifying,
            signing: None,
        })
    }

    /// Signing provider from a Base64url secret seed
    pub fn from_secret_key(encoded: &str) -> Result<Self, SignatureError> {
        let bytes: [u8; 32] = decode_key(encoded, "secret key")?;
        Ok(Self::from_signing(SigningKey::from_bytes(&bytes)))
    }

    fn from_signing(signing: SigningKey) -> Self {
        Self {
            verifying: signing.verifying_key(),
            signing: Some(signing),
        }
    }

    /// Base64url public key
    pub fn public_key(&self) -> String {
        encode_signature(self.verifying.as_bytes())
    }
}

impl SignatureProvider for Ed25519Provider {
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::Ed25519
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SignatureError> {
        let signing = self
            .signing
            .as_ref()
            .ok_or_else(|| SignatureError::SigningUnavailable(self.algorithm().to_string()))?;
        Ok(signing.sign(data).to_bytes().to_vec())
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        let Ok(bytes) = <[u8; 64]>::try_from(signature) else {
            return false;
        };
        self.verifying
            .verify(data, &Signature::from_bytes(&bytes))
            .is_ok()
    }
}

/// Shared-secret provider based on HMAC-SHA256
pub struct HmacSha256Provider {
    key: Vec<u8>,
}

impl HmacSha256Provider {
    pub fn new(key: Vec<u8>) -> Result<Self, SignatureError> {
        if key.is_empty() {
            return Err(SignatureError::InvalidKey("HMAC secret is empty".into()));
        }
        Ok(Self { key })
    }
}

impl SignatureProvider for HmacSha256Provider {
    fn algorithm(&self) -> SignatureAlgorithm {
        SignatureAlgorithm::HmacSha256
    }

    fn sign(&self, data: &[u8]) -> Result<Vec<u8>, SignatureError> {
        compute_hmac(&self.key, data).map_err(|e| SignatureError::InvalidKey(e.to_string()))
    }

    fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        verify_hmac(&self.key, data, signature)
    }
}

fn decode_key(encoded: &str, what: &str) -> Result<[u8; 32], SignatureError> {
    let bytes = decode_signature(encoded)
        .ok_or_else(|| SignatureError::InvalidKey(format!("{what} is not Base64url")))?;
    <[u8; 32]>::try_from(bytes.as_slice())
        .map_err(|_| SignatureError::InvalidKey(format!("{what} must be 32 bytes")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ed25519_roundtrip() {
        let (provider, pair) = Ed25519Provider::generate();
        let signature = provider.sign(b"payload").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(provider.verify(b"payload", &signature));
        assert!(!provider.verify(b"payload!", &signature));

        let verify_only = Ed25519Provider::from_public_key(&pair.public_key).unwrap();
        assert!(verify_only.verify(b"payload", &signature));
        assert!(matches!(
            verify_only.sign(b"payload"),
            Err(SignatureError::SigningUnavailable(_))
        ));

        let restored = Ed25519Provider::from_secret_key(&pair.secret_key).unwrap();
        assert_eq!(restored.public_key(), pair.public_key);
    }

    #[test]
    fn test_ed25519_rejects_malformed_signature() {
        let (provider, _) = Ed25519Provider::generate();
        assert!(!provider.verify(b"payload", b"short"));
    }

    #[test]
    fn test_invalid_public_key() {
        assert!(Ed25519Provider::from_public_key("not-base64!").is_err());
        assert!(Ed25519Provider::from_public_key(&encode_signature(&[1, 2, 3])).is_err());
    }

    #[test]
    fn test_hmac_provider() {
        let provider = HmacSha256Provider::new(b"secret".to_vec()).unwrap();
        let signature = provider.sign(b"data").unwrap();
        assert!(provider.verify(b"data", &signature));
        assert!(HmacSha256Provider::new(Vec::new()).is_err());
    }

    #[test]
    fn test_algorithm_builds_provider() {
        let (signer, pair) = Ed25519Provider::generate();
        let signature = signer.sign(b"abc").unwrap();

        let provider = SignatureAlgorithm::Ed25519.provider(&pair.public_key).unwrap();
        assert!(provider.verify(b"abc", &signature));

        let hmac = SignatureAlgorithm::HmacSha256
            .provider(&encode_signature(b"k"))
            .unwrap();
        assert_eq!(hmac.algorithm(), SignatureAlgorithm::HmacSha256);
    }

    #[test]
    fn test_signature_encoding() {
        let encoded = encode_signature(&[0xfb, 0xff, 0x00]);
        assert!(!encoded.contains('+') && !encoded.contains('/') && !encoded.contains('='));
        assert_eq!(decode_signature(&encoded).unwrap(), vec![0xfb, 0xff, 0x00]);
        assert_eq!(decode_signature("-_8A").unwrap(), vec![0xfb, 0xff, 0x00]);
        assert!(decode_signature("***").is_none());
    }
}
