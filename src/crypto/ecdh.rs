//! Ephemeral ECDH over P-256, used to seed the handshake's shared secret
//! (`g_a`, `g_b` in §4.F).

use p256::ecdh::EphemeralSecret;
use p256::PublicKey;
use rand_core::OsRng;

use crate::error::{CredbError, Result};

/// One side's ephemeral Diffie-Hellman keypair.
pub struct EphemeralKeypair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeypair {
    /// Generates a fresh ephemeral keypair (`g_a` or `g_b`).
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The public point to send to the peer, SEC1 encoded.
    pub fn public_bytes(&self) -> Vec<u8> {
        self.public.to_sec1_bytes().to_vec()
    }

    /// Computes the raw shared secret given the peer's public point.
    pub fn shared_secret(&self, peer_public_bytes: &[u8]) -> Result<Vec<u8>> {
        let peer_public = PublicKey::from_sec1_bytes(peer_public_bytes)
            .map_err(|_| CredbError::integrity("malformed peer DH public point"))?;
        let shared = self.secret.diffie_hellman(&peer_public);
        Ok(shared.raw_secret_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_derive_the_same_secret() {
        let a = EphemeralKeypair::generate();
        let b = EphemeralKeypair::generate();
        let secret_a = a.shared_secret(&b.public_bytes()).unwrap();
        let secret_b = b.shared_secret(&a.public_bytes()).unwrap();
        assert_eq!(secret_a, secret_b);
    }

    #[test]
    fn rejects_malformed_peer_point() {
        let a = EphemeralKeypair::generate();
        assert!(a.shared_secret(b"not a point").is_err());
    }
}
