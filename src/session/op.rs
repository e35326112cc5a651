//! Operation codes and the request/response message shapes carried
//! inside the operation envelope (§6).

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::{CredbError, Result};

/// The message type byte that precedes a request/response/notification
/// inside a plaintext or decrypted frame body.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[repr(u8)]
pub enum MessageType {
    /// A client-to-server operation request.
    OperationRequest = 1,
    /// A server-to-client operation response.
    OperationResponse = 2,
    /// A server-pushed trigger notification, uncorrelated.
    NotifyTrigger = 3,
}

impl TryFrom<u8> for MessageType {
    type Error = CredbError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(MessageType::OperationRequest),
            2 => Ok(MessageType::OperationResponse),
            3 => Ok(MessageType::NotifyTrigger),
            _ => Err(CredbError::protocol("unknown message type byte")),
        }
    }
}

/// Stable operation codes (§6). Values are an implementation detail
/// (not wire-compatible with any other system) but are fixed within
/// this crate's lifetime once assigned.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum OperationCode {
    /// List known downstream replica peers.
    ListPeers = 0,
    /// Register or query a single peer.
    Peer = 1,
    /// Compile and run a sandboxed program against the ledger view.
    ExecuteCode = 2,
    /// Assemble and sign a witness over a set of events.
    CreateWitness = 3,
    /// No-op, used for liveness checks.
    Nop = 4,
    /// Export the full store to a byte stream.
    DumpEverything = 5,
    /// Import a full store byte stream, replacing current state.
    LoadEverything = 6,
    /// Full-value write.
    PutObject = 7,
    /// Full-value write with a server-generated key.
    PutObjectWithoutKey = 8,
    /// Delete a key (tombstone).
    RemoveObject = 9,
    /// Remove every key in a collection.
    Clear = 10,
    /// Register a trigger callback for a collection.
    SetTrigger = 11,
    /// Unregister a trigger callback.
    UnsetTrigger = 12,
    /// Existence check.
    HasObject = 13,
    /// Predicate check against a key's current value.
    CheckObject = 14,
    /// Read a key's current (or historical) value.
    GetObject = 15,
    /// Read a key's value, returning a witness alongside it.
    GetObjectWithWitness = 16,
    /// Read a key's full version history.
    GetObjectHistory = 17,
    /// Create a secondary index over a document path.
    CreateIndex = 18,
    /// Drop a secondary index.
    DropIndex = 19,
    /// Diff two versions of a key.
    DiffVersions = 20,
    /// Count keys matching predicates.
    CountObjects = 21,
    /// Find keys matching predicates.
    FindObjects = 22,
    /// Shallow-merge write.
    AddToObject = 23,
    /// Invoke a sandboxed program's compiled entrypoint.
    CallProgram = 24,
    /// Compare two events' causal order.
    OrderEvents = 25,
    /// Commit a buffered transaction.
    CommitTransaction = 26,
    /// Retrieve server statistics.
    GetStatistics = 27,
}

impl TryFrom<u8> for OperationCode {
    type Error = CredbError;

    fn try_from(value: u8) -> Result<Self> {
        use OperationCode::*;
        const ALL: &[OperationCode] = &[
            ListPeers, Peer, ExecuteCode, CreateWitness, Nop, DumpEverything, LoadEverything,
            PutObject, PutObjectWithoutKey, RemoveObject, Clear, SetTrigger, UnsetTrigger,
            HasObject, CheckObject, GetObject, GetObjectWithWitness, GetObjectHistory,
            CreateIndex, DropIndex, DiffVersions, CountObjects, FindObjects, AddToObject,
            CallProgram, OrderEvents, CommitTransaction, GetStatistics,
        ];
        ALL.iter()
            .copied()
            .find(|op| *op as u8 == value)
            .ok_or_else(|| CredbError::protocol("unknown operation code"))
    }
}

/// A correlation id: which client task this belongs to, and which of
/// that task's possibly-many outstanding operations it is (§5, §9).
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Correlation {
    /// Groups operations issued by one logical client task (e.g. one
    /// transaction's batched reads).
    pub task_id: u32,
    /// Identifies this specific operation within its task.
    pub op_id: u32,
}

/// A parsed `OperationRequest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRequest {
    /// Correlation id the matching response will echo.
    pub correlation: Correlation,
    /// Which operation to perform.
    pub op: OperationCode,
    /// Operation-specific arguments. Document-format parsing is an
    /// external collaborator's concern (§1); the envelope carries
    /// already-parsed argument trees.
    pub args: Json,
}

/// A parsed `OperationResponse`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationResponse {
    /// Correlation id matching the originating request.
    pub correlation: Correlation,
    /// The outcome of the operation.
    pub body: ResponseBody,
}

/// The result carried by an `OperationResponse`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseBody {
    /// Successful result, with an optional signed witness armor.
    Ok {
        /// Operation-specific result value.
        value: Json,
        /// A witness, ASCII-armored, if one was requested.
        witness: Option<String>,
    },
    /// A per-request or per-transaction error (§7).
    Err {
        /// Human-readable error message.
        message: String,
    },
}

/// A server-pushed, uncorrelated notification that a collection was
/// touched by a committed write (§4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyTrigger {
    /// The collection whose trigger fired.
    pub collection_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_operation_code_roundtrips_through_its_byte() {
        for byte in 0..=27u8 {
            let op = OperationCode::try_from(byte).unwrap();
            assert_eq!(op as u8, byte);
        }
    }

    #[test]
    fn unknown_operation_byte_is_rejected() {
        assert!(OperationCode::try_from(200).is_err());
    }
}
