//! AES-CMAC based key derivation (§4.F, §9).
//!
//! The handshake derives four 128-bit keys from the ECDH shared secret:
//! `SMK` (handshake MAC), `MK` (report MAC), `SK` (session data), and
//! `VK` (report binding). Each is `CMAC(shared_secret, label)` for a
//! single-byte label, the construction the SIGMA-style key schedule in
//! §4.F describes.

use aes::Aes128;
use cmac::{Cmac, Mac};
use zeroize::Zeroize;

/// A 128-bit key, zeroized on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct Key128(pub [u8; 16]);

impl Key128 {
    /// Borrows the raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// The four session keys derived from one ECDH shared secret.
pub struct SessionKeys {
    /// Handshake MAC key, binds msg2's CMAC.
    pub smk: Key128,
    /// Report MAC key, binds the `AttestationResult` platform info.
    pub mk: Key128,
    /// Session data key, used for the AES-GCM operation envelope.
    pub sk: Key128,
    /// Report binding key, folded into msg3's report-data hash.
    pub vk: Key128,
}

fn cmac_label(shared_secret: &[u8], label: u8) -> Key128 {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(&derive_cmac_key(shared_secret))
        .expect("cmac accepts any key length via key reduction below");
    mac.update(&[label]);
    let tag = mac.finalize().into_bytes();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&tag[..16]);
    Key128(bytes)
}

/// Reduces an arbitrary-length shared secret to a 128-bit CMAC key by
/// CMAC-ing it under an all-zero key, the standard NIST SP 800-56C
/// single-step extract used ahead of an expand-by-label schedule.
fn derive_cmac_key(shared_secret: &[u8]) -> [u8; 16] {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(&[0u8; 16]).unwrap();
    mac.update(shared_secret);
    let tag = mac.finalize().into_bytes();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&tag[..16]);
    bytes
}

impl SessionKeys {
    /// Derives all four session keys from the raw ECDH shared secret.
    pub fn derive(shared_secret: &[u8]) -> Self {
        Self {
            smk: cmac_label(shared_secret, 0x01),
            mk: cmac_label(shared_secret, 0x02),
            sk: cmac_label(shared_secret, 0x03),
            vk: cmac_label(shared_secret, 0x04),
        }
    }
}

/// Computes `CMAC-SMK` over an arbitrary prefix, used to bind msg2 and
/// to authenticate the `AttestationResult`'s platform info (`mac_MK`).
pub fn cmac_tag(key: &Key128, data: &[u8]) -> [u8; 16] {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(&key.0).unwrap();
    mac.update(data);
    let tag = mac.finalize().into_bytes();
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&tag[..16]);
    bytes
}

/// Verifies a CMAC tag in constant time via the underlying crate's
/// `verify` (which itself uses a constant-time comparison).
pub fn cmac_verify(key: &Key128, data: &[u8], tag: &[u8; 16]) -> bool {
    let mut mac = <Cmac<Aes128> as Mac>::new_from_slice(&key.0).unwrap();
    mac.update(data);
    mac.verify_slice(tag).is_ok()
}
