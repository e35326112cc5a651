//! AES-GCM-128 sealing for the session wire envelope (§4.F, §6, §9).
//!
//! The spec's fixed zero IV is safe only when a key is used for exactly
//! one message or when a counter is folded into the nonce. A session
//! key `SK` seals many frames over its lifetime, so — per the §9 design
//! note's recommendation — every frame derives its nonce from
//! `(op_id, direction)` rather than reusing an all-zero IV.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};

use crate::crypto::kdf::Key128;
use crate::error::{CredbError, Result};

/// Which direction a frame travels, folded into its nonce so client- and
/// server-originated frames under the same `op_id` never collide.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Direction {
    /// Client to server.
    ClientToServer,
    /// Server to client.
    ServerToClient,
}

fn nonce_for(op_id: u32, direction: Direction) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[0] = match direction {
        Direction::ClientToServer => 0,
        Direction::ServerToClient => 1,
    };
    nonce[4..8].copy_from_slice(&op_id.to_le_bytes());
    nonce
}

/// Encrypts `payload` into an opaque sealed frame body (ciphertext with
/// the 16-byte tag appended, as AES-GCM implementations conventionally
/// lay it out in memory).
pub fn seal(sk: &Key128, op_id: u32, direction: Direction, payload: &[u8]) -> Vec<u8> {
    let cipher = Aes128Gcm::new_from_slice(sk.as_bytes()).expect("16-byte key");
    let nonce_bytes = nonce_for(op_id, direction);
    let nonce = Nonce::from_slice(&nonce_bytes);
    cipher
        .encrypt(nonce, payload)
        .expect("AES-GCM-128 encryption of a bounded frame cannot fail")
}

/// Decrypts and authenticates a sealed frame body produced by `seal`.
pub fn open(sk: &Key128, op_id: u32, direction: Direction, sealed: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes128Gcm::new_from_slice(sk.as_bytes()).expect("16-byte key");
    let nonce_bytes = nonce_for(op_id, direction);
    let nonce = Nonce::from_slice(&nonce_bytes);
    cipher
        .decrypt(nonce, sealed)
        .map_err(|_| CredbError::integrity("session frame authentication failed"))
}
