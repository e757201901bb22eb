//! Signing and session-MAC capability calls.
//!
//! Volumes, users and gateways each hold an ed25519 keypair. Gateways
//! additionally receive a 32-byte session key on registration which they
//! use to MAC every request URL (blake3 keyed hash).

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signer, Verifier};
use serde::{Deserialize, Serialize};

pub const SECRET_KEY_SIZE: usize = 32;
pub const PUBLIC_KEY_SIZE: usize = 32;
pub const SIGNATURE_SIZE: usize = 64;
pub const SESSION_KEY_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
    #[error("invalid signature encoding")]
    InvalidSignature,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// An ed25519 signing key.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "[u8; SECRET_KEY_SIZE]", into = "[u8; SECRET_KEY_SIZE]")]
pub struct SecretKey(ed25519_dalek::SigningKey);

impl SecretKey {
    pub fn generate() -> Self {
        let seed: [u8; SECRET_KEY_SIZE] = rand::random();
        Self(ed25519_dalek::SigningKey::from_bytes(&seed))
    }

    pub fn from_bytes(bytes: &[u8; SECRET_KEY_SIZE]) -> Self {
        Self(ed25519_dalek::SigningKey::from_bytes(bytes))
    }

    pub fn to_bytes(&self) -> [u8; SECRET_KEY_SIZE] {
        self.0.to_bytes()
    }

    pub fn public(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.0.sign(message).to_bytes()
    }
}

impl From<[u8; SECRET_KEY_SIZE]> for SecretKey {
    fn from(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        Self::from_bytes(&bytes)
    }
}

impl From<SecretKey> for [u8; SECRET_KEY_SIZE] {
    fn from(key: SecretKey) -> Self {
        key.to_bytes()
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SecretKey").field(&self.public()).finish()
    }
}

/// An ed25519 verifying key.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[u8; PUBLIC_KEY_SIZE]", into = "[u8; PUBLIC_KEY_SIZE]")]
pub struct PublicKey(ed25519_dalek::VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; PUBLIC_KEY_SIZE]) -> Result<Self, CryptoError> {
        ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let mut bytes = [0u8; PUBLIC_KEY_SIZE];
        hex::decode_to_slice(hex_str.trim(), &mut bytes)?;
        Self::from_bytes(&bytes)
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        let signature = ed25519_dalek::Signature::from_slice(signature)
            .map_err(|_| CryptoError::InvalidSignature)?;
        self.0
            .verify(message, &signature)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl TryFrom<[u8; PUBLIC_KEY_SIZE]> for PublicKey {
    type Error = CryptoError;

    fn try_from(bytes: [u8; PUBLIC_KEY_SIZE]) -> Result<Self, Self::Error> {
        Self::from_bytes(&bytes)
    }
}

impl From<PublicKey> for [u8; PUBLIC_KEY_SIZE] {
    fn from(key: PublicKey) -> Self {
        key.to_bytes()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Shared secret issued to a gateway at registration.
///
/// Requests are authenticated with `base64(blake3_keyed(key, message))`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionKey([u8; SESSION_KEY_SIZE]);

impl SessionKey {
    pub fn generate() -> Self {
        Self(rand::random())
    }

    pub fn from_bytes(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }

    pub fn mac(&self, message: &[u8]) -> blake3::Hash {
        blake3::keyed_hash(&self.0, message)
    }

    pub fn mac_b64(&self, message: &[u8]) -> String {
        BASE64.encode(self.mac(message).as_bytes())
    }

    /// Check a base64 MAC. Comparison is constant-time.
    pub fn verify_b64(&self, message: &[u8], mac_b64: &str) -> bool {
        let Ok(decoded) = BASE64.decode(mac_b64) else {
            return false;
        };
        let Ok(bytes) = <[u8; blake3::OUT_LEN]>::try_from(decoded.as_slice()) else {
            return false;
        };
        self.mac(message) == blake3::Hash::from_bytes(bytes)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let key = SecretKey::generate();
        let sig = key.sign(b"hello");
        assert!(key.public().verify(b"hello", &sig).is_ok());
        assert!(key.public().verify(b"hellp", &sig).is_err());
        assert!(matches!(
            key.public().verify(b"hello", &sig[..10]),
            Err(CryptoError::InvalidSignature)
        ));
    }

    #[test]
    fn test_public_key_hex_roundtrip() {
        let public = SecretKey::generate().public();
        assert_eq!(PublicKey::from_hex(&public.to_hex()).unwrap(), public);
        assert!(PublicKey::from_hex("zz").is_err());
    }

    #[test]
    fn test_session_mac() {
        let session = SessionKey::generate();
        let other = SessionKey::generate();
        let mac = session.mac_b64(b"UG_7:/FILE/1/0/0/0");

        assert!(session.verify_b64(b"UG_7:/FILE/1/0/0/0", &mac));
        assert!(!session.verify_b64(b"UG_7:/FILE/1/0/0/1", &mac));
        assert!(!other.verify_b64(b"UG_7:/FILE/1/0/0/0", &mac));
        assert!(!session.verify_b64(b"UG_7:/FILE/1/0/0/0", "not base64!"));
        assert!(!session.verify_b64(b"UG_7:/FILE/1/0/0/0", "AAAA"));
    }

    #[test]
    fn test_secret_key_debug_hides_secret() {
        let key = SecretKey::generate();
        let debug = format!("{:?}", key);
        assert!(!debug.contains(&hex::encode(key.to_bytes())));
    }
}
