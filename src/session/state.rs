//! Connection lifecycle states (§4.F, §5).
//!
//! The spec's five named states describe the handshake from the
//! connecting client's point of view: which message it is still
//! waiting to receive before it can move on. The server side of a
//! connection tracks its own progress with [`ServerHandshakeState`],
//! which mirrors the same four-message exchange but from the opposite
//! vantage point (it waits for the client's replies, not the server's
//! own outgoing messages).

/// Lifecycle state of a client's view of one session connection.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ConnectionState {
    /// Waiting for the server's `TellGroupId`.
    WaitingForGroupId,
    /// `GroupIdResponse` sent; waiting for `AttestationMessage1`.
    WaitingForMsg1,
    /// `AttestationMessage2` sent; waiting for `AttestationMessage3`
    /// (and the `AttestationResult` that completes the handshake).
    WaitingForMsg3,
    /// Handshake complete; encrypted operation frames may flow.
    Connected,
    /// Connection closed cleanly (by either side).
    Closed,
    /// Handshake or protocol failure. Terminal; the connection is torn
    /// down. Carries a human-readable reason, e.g. `"Server names
    /// don't match"` (§8 scenario 6).
    Failure(String),
}

impl ConnectionState {
    /// Whether operation frames may be exchanged in this state.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// Whether this state is terminal (no further transitions expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Closed | ConnectionState::Failure(_))
    }
}

/// The server's view of one connection's handshake progress. A server
/// sends every one of the four numbered messages, so it waits only on
/// the client's two replies (`GroupIdResponse`, `AttestationMessage2`).
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ServerHandshakeState {
    /// `TellGroupId` sent; waiting for `GroupIdResponse`.
    WaitingForGroupIdResponse,
    /// `AttestationMessage1` sent; waiting for `AttestationMessage2`.
    WaitingForMsg2,
    /// `AttestationMessage3` and `AttestationResult` sent; handshake done.
    Connected,
    /// Connection closed cleanly.
    Closed,
    /// Handshake or protocol failure, terminal.
    Failure(String),
}

impl ServerHandshakeState {
    /// Whether operation frames may be exchanged in this state.
    pub fn is_connected(&self) -> bool {
        matches!(self, ServerHandshakeState::Connected)
    }
}
