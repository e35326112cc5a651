//! Wire frame encoding (§6).
//!
//! ```text
//! frame   := len:u32 body
//! body    := enc_tag:u8 ( attestation_payload | encrypted_payload | plain_payload )
//! encrypted_payload := payload_len:u32 ciphertext[payload_len] tag[16]
//! ```
//!
//! All multi-byte integers are little-endian (§6: "big-endian-free").

use crate::error::{CredbError, Result};

const TAG_LEN: usize = 16;

/// The one-byte encryption tag every frame body starts with.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum EncTag {
    /// Handshake messages, always sent in the clear.
    Attestation = 0,
    /// AES-GCM-128 sealed operation envelope.
    Encrypted = 1,
    /// Unencrypted payload, only used in unsafe mode (§4.F).
    Plaintext = 2,
}

impl TryFrom<u8> for EncTag {
    type Error = CredbError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(EncTag::Attestation),
            1 => Ok(EncTag::Encrypted),
            2 => Ok(EncTag::Plaintext),
            _ => Err(CredbError::protocol("unknown encryption tag byte")),
        }
    }
}

/// Encodes one complete length-prefixed frame.
pub fn encode_frame(tag: EncTag, body: &[u8]) -> Vec<u8> {
    let total_len = 1 + body.len();
    let mut out = Vec::with_capacity(4 + total_len);
    out.extend_from_slice(&(total_len as u32).to_le_bytes());
    out.push(tag as u8);
    out.extend_from_slice(body);
    out
}

/// Decodes the next complete frame from the front of `buf`, returning
/// the tag, the body slice, and the number of bytes consumed. Returns
/// `Ok(None)` if `buf` does not yet hold a complete frame (the caller
/// should read more bytes and retry).
pub fn decode_frame(buf: &[u8]) -> Result<Option<(EncTag, &[u8], usize)>> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    if len == 0 {
        return Err(CredbError::protocol("zero-length frame"));
    }
    let consumed = 4 + len;
    if buf.len() < consumed {
        return Ok(None);
    }
    let tag = EncTag::try_from(buf[4])?;
    let body = &buf[5..consumed];
    Ok(Some((tag, body, consumed)))
}

/// Packs a sealed AES-GCM buffer (ciphertext‖tag, as `crypto::envelope`
/// produces it) into the wire's `encrypted_payload` layout.
pub fn encode_encrypted_payload(sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < TAG_LEN {
        return Err(CredbError::protocol("sealed payload shorter than AEAD tag"));
    }
    let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
    let mut out = Vec::with_capacity(4 + sealed.len());
    out.extend_from_slice(&(ciphertext.len() as u32).to_le_bytes());
    out.extend_from_slice(ciphertext);
    out.extend_from_slice(tag);
    Ok(out)
}

/// Unpacks an `encrypted_payload` back into a ciphertext‖tag buffer
/// suitable for `crypto::envelope::open`.
pub fn decode_encrypted_payload(buf: &[u8]) -> Result<Vec<u8>> {
    if buf.len() < 4 {
        return Err(CredbError::protocol("encrypted payload shorter than length prefix"));
    }
    let payload_len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let rest = &buf[4..];
    if rest.len() != payload_len + TAG_LEN {
        return Err(CredbError::protocol("encrypted payload length mismatch"));
    }
    Ok(rest.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrip() {
        let encoded = encode_frame(EncTag::Plaintext, b"hello");
        let (tag, body, consumed) = decode_frame(&encoded).unwrap().unwrap();
        assert_eq!(tag, EncTag::Plaintext);
        assert_eq!(body, b"hello");
        assert_eq!(consumed, encoded.len());
    }

    #[test]
    fn incomplete_frame_returns_none() {
        let encoded = encode_frame(EncTag::Encrypted, b"payload bytes");
        assert!(decode_frame(&encoded[..encoded.len() - 1]).unwrap().is_none());
        assert!(decode_frame(&encoded[..2]).unwrap().is_none());
    }

    #[test]
    fn encrypted_payload_roundtrip() {
        let sealed = b"ciphertextbytes0123456789abcdef"; // last 16 bytes stand in for the tag
        let packed = encode_encrypted_payload(sealed).unwrap();
        let unpacked = decode_encrypted_payload(&packed).unwrap();
        assert_eq!(unpacked, sealed);
    }

    #[test]
    fn unknown_tag_byte_is_rejected() {
        let mut encoded = encode_frame(EncTag::Plaintext, b"x");
        encoded[4] = 0xFF;
        assert!(decode_frame(&encoded).is_err());
    }
}
