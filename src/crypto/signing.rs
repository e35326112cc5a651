//! ECDSA-P256 signing and verification, used for witnesses (§3 Witness)
//! and for msg2's `sig(g_b‖g_a)` binding (§4.F).

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use rand_core::OsRng;

use crate::error::{CredbError, Result};

/// An ECDSA-P256 identity keypair.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generates a fresh random identity.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Restores an identity from its raw scalar bytes (as persisted in a
    /// `<name>.identity` file, §6).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let signing_key = SigningKey::from_slice(bytes)
            .map_err(|_| CredbError::integrity("malformed identity key material"))?;
        Ok(Self { signing_key })
    }

    /// Serializes the raw scalar bytes for persistence.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.signing_key.to_bytes().to_vec()
    }

    /// The public verifying key corresponding to this identity.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: *self.signing_key.verifying_key(),
        }
    }

    /// Signs an arbitrary message.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        let sig: Signature = self.signing_key.sign(message);
        sig.to_der().as_bytes().to_vec()
    }
}

/// A public ECDSA-P256 key, used to verify witnesses and msg2 signatures.
#[derive(Clone, Copy)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl PublicKey {
    /// Parses a public key from its SEC1 encoded-point bytes.
    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self> {
        let verifying_key = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|_| CredbError::integrity("malformed public key bytes"))?;
        Ok(Self { verifying_key })
    }

    /// Encodes this public key as SEC1 encoded-point bytes.
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.verifying_key.to_encoded_point(false).as_bytes().to_vec()
    }

    /// Verifies a DER-encoded signature over `message`.
    pub fn verify(&self, message: &[u8], der_signature: &[u8]) -> bool {
        match Signature::from_der(der_signature) {
            Ok(sig) => self.verifying_key.verify(message, &sig).is_ok(),
            Err(_) => false,
        }
    }
}
