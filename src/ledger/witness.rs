//! Signed witnesses (§3 Witness, §4.D).
//!
//! A witness is a signed, portable attestation that a set of ledger
//! events were committed. It is distilled from a shard's ledger by
//! recording, per shard, the highest event id observed, then signing a
//! canonical JSON document over that summary with the server's identity
//! key. Witnesses are exchanged between servers (or handed to an
//! external auditor) and persisted in an ASCII-armored text form.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::crypto::signing::{Identity, PublicKey};
use crate::error::{CredbError, Result};

const ARMOR_BEGIN: &str = "-----BEGIN CREDB WITNESS-----";
const ARMOR_END: &str = "-----END CREDB WITNESS-----";
const ARMOR_WRAP_COLUMN: usize = 64;

/// One event covered by a witness: its ledger identity, the key it
/// wrote, the resulting version (its ordinal position in that key's
/// chain), and which kind of write it was.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WitnessedEvent {
    /// Which shard produced this event.
    pub shard: u32,
    /// The log block the event landed in.
    pub block: u64,
    /// The event's index within that block.
    pub index: u32,
    /// The key this event wrote.
    pub key: String,
    /// The key's version after this write (1-based position in its chain).
    pub version: u64,
    /// `"put"`, `"add"`, or `"remove"`.
    pub operation: String,
}

/// The signed document body (what actually gets hashed and signed).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WitnessBody {
    server_name: String,
    events: Vec<WitnessedEvent>,
}

/// A signed witness over a set of covered ledger events.
#[derive(Debug, Clone)]
pub struct Witness {
    body: WitnessBody,
    signature: Vec<u8>,
}

impl Witness {
    /// Assembles and signs a witness covering `events` on behalf of
    /// `server_name`, using `identity` to sign.
    pub fn assemble(server_name: &str, events: Vec<WitnessedEvent>, identity: &Identity) -> Self {
        let body = WitnessBody {
            server_name: server_name.to_string(),
            events,
        };
        let canonical = serde_json::to_vec(&body).expect("witness body always serializes");
        let signature = identity.sign(&canonical);
        Self { body, signature }
    }

    /// The events this witness covers.
    pub fn events(&self) -> &[WitnessedEvent] {
        &self.body.events
    }

    /// Verifies this witness's signature against `public_key`.
    pub fn verify(&self, public_key: &PublicKey) -> bool {
        let canonical = match serde_json::to_vec(&self.body) {
            Ok(bytes) => bytes,
            Err(_) => return false,
        };
        public_key.verify(&canonical, &self.signature)
    }

    /// The server name this witness was issued by.
    pub fn server_name(&self) -> &str {
        &self.body.server_name
    }

    /// Per-shard highest `(block, index)` this witness vouches for,
    /// encoded as a single monotonic `u64` (`block << 32 | index`) for
    /// easy comparison in `ledger::order`. Derived from the covered
    /// event list rather than stored directly.
    pub fn shard_high_water_marks(&self) -> BTreeMap<u32, u64> {
        let mut marks: BTreeMap<u32, u64> = BTreeMap::new();
        for event in &self.body.events {
            let value = (event.block << 32) | event.index as u64;
            marks
                .entry(event.shard)
                .and_modify(|current| *current = (*current).max(value))
                .or_insert(value);
        }
        marks
    }

    /// Serializes this witness (body + signature) to its ASCII-armored
    /// on-disk form.
    pub fn to_armor(&self) -> String {
        let payload = WireForm {
            body: self.body.clone(),
            signature: self.signature.clone(),
        };
        let raw = serde_json::to_vec(&payload).expect("witness wire form always serializes");
        let encoded = BASE64.encode(raw);

        let mut out = String::new();
        out.push_str(ARMOR_BEGIN);
        out.push('\n');
        for chunk in encoded.as_bytes().chunks(ARMOR_WRAP_COLUMN) {
            out.push_str(std::str::from_utf8(chunk).expect("base64 output is ASCII"));
            out.push('\n');
        }
        let _ = write!(out, "{ARMOR_END}\n");
        out
    }

    /// Parses a witness from its ASCII-armored on-disk form, without
    /// verifying the signature (call `verify` separately).
    pub fn from_armor(armored: &str) -> Result<Self> {
        let mut lines = armored.lines();
        let first = lines
            .next()
            .ok_or_else(|| CredbError::integrity("empty witness armor"))?;
        if first.trim() != ARMOR_BEGIN {
            return Err(CredbError::integrity("missing witness armor header"));
        }
        let mut body_b64 = String::new();
        let mut saw_end = false;
        for line in lines {
            if line.trim() == ARMOR_END {
                saw_end = true;
                break;
            }
            body_b64.push_str(line.trim());
        }
        if !saw_end {
            return Err(CredbError::integrity("missing witness armor footer"));
        }
        let raw = BASE64
            .decode(body_b64.as_bytes())
            .map_err(|_| CredbError::integrity("malformed witness base64"))?;
        let wire: WireForm = serde_json::from_slice(&raw)
            .map_err(|_| CredbError::integrity("malformed witness payload"))?;
        Ok(Self {
            body: wire.body,
            signature: wire.signature,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireForm {
    body: WitnessBody,
    signature: Vec<u8>,
}
