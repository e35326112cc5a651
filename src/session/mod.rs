//! The session protocol (Component F): the attested handshake, wire
//! framing, operation codes and dispatch, pending-response bookkeeping,
//! and server-push triggers.

pub mod dispatch;
pub mod frame;
pub mod handshake;
pub mod op;
pub mod pending;
pub mod state;
pub mod trigger;

pub use dispatch::{Dispatcher, ProgramRuntime, ServerState};
pub use frame::{decode_encrypted_payload, decode_frame, encode_encrypted_payload, encode_frame, EncTag};
pub use handshake::{
    AttestationMessage1, AttestationMessage2, AttestationMessage3, AttestationResult,
    ClientHandshake, GroupIdResponse, Quote, ServerHandshake, TellGroupId,
};
pub use op::{Correlation, MessageType, NotifyTrigger, OperationCode, OperationRequest, OperationResponse, ResponseBody};
pub use pending::PendingResponses;
pub use state::{ConnectionState, ServerHandshakeState};
pub use trigger::{TriggerRegistry, TriggerSender};
