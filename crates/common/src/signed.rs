//! Signed-message envelope.
//!
//! A signed message is a fixed-schema struct with a `signature` byte field.
//! The signature covers the bincode serialization of the struct with that
//! field emptied; verification repeats the same step before checking.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crypto::{CryptoError, PublicKey, SecretKey};

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("malformed envelope: {0}")]
    Codec(#[from] bincode::Error),
    #[error("missing signature")]
    Unsigned,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

pub trait Signed: Serialize + DeserializeOwned + Clone {
    fn signature(&self) -> &[u8];

    fn signature_mut(&mut self) -> &mut Vec<u8>;

    /// Bytes covered by the signature.
    fn signable_bytes(&self) -> Result<Vec<u8>, EnvelopeError> {
        let mut unsigned = self.clone();
        unsigned.signature_mut().clear();
        Ok(bincode::serialize(&unsigned)?)
    }

    fn sign_with(&mut self, key: &SecretKey) -> Result<(), EnvelopeError> {
        self.signature_mut().clear();
        let bytes = bincode::serialize(&*self)?;
        *self.signature_mut() = key.sign(&bytes).to_vec();
        Ok(())
    }

    fn signed_with(mut self, key: &SecretKey) -> Result<Self, EnvelopeError> {
        self.sign_with(key)?;
        Ok(self)
    }

    fn verify_with(&self, key: &PublicKey) -> Result<(), EnvelopeError> {
        if self.signature().is_empty() {
            return Err(EnvelopeError::Unsigned);
        }
        let bytes = self.signable_bytes()?;
        key.verify(&bytes, self.signature())?;
        Ok(())
    }

    fn to_wire(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(bincode::serialize(self)?)
    }

    fn from_wire(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Implement [`Signed`] for a struct with a `signature: Vec<u8>` field.
#[macro_export]
macro_rules! impl_signed {
    ($ty:ty) => {
        impl $crate::signed::Signed for $ty {
            fn signature(&self) -> &[u8] {
                &self.signature
            }

            fn signature_mut(&mut self) -> &mut Vec<u8> {
                &mut self.signature
            }
        }
    };
}
