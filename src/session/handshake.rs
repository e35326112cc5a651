//! The four-message attested handshake (§4.F).
//!
//! A SIGMA-style exchange: the server proves its enclave identity to
//! the client via a hardware-rooted quote, the client proves its own
//! identity via an ECDSA signature, and both sides end up holding four
//! independently derived 128-bit keys (`SMK`, `MK`, `SK`, `VK`) without
//! either ever putting the long-term keys on the wire.
//!
//! Message direction, resolved from spec.md §4.F and §9 (the prose
//! names a `sig(g_b‖g_a)` under "the client's ECDSA key" and says "the
//! server verifies" msg3's hash, which only compose into one consistent
//! protocol if read as below; see `DESIGN.md`'s Open Questions):
//!
//! 1. `TellGroupId` — server → client.
//! 2. `GroupIdResponse` — client → server.
//! 3. `AttestationMessage1` (carries `g_a`) — server → client.
//!    `AttestationMessage2` (carries `g_b`, `sig_client(g_b‖g_a)`,
//!    `CMAC-SMK`) — client → server.
//!    `AttestationMessage3` (carries `g_a` again, a quote whose
//!    report-data is `SHA-256(g_a‖g_b‖VK)`, `CMAC-SMK`) — server →
//!    client; the client verifies both the CMAC and the hash.
//! 4. `AttestationResult` (`status`, `platform_info`, `mac_MK`) —
//!    server → client.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::ecdh::EphemeralKeypair;
use crate::crypto::kdf::{cmac_tag, cmac_verify, Key128, SessionKeys};
use crate::crypto::signing::{Identity, PublicKey};
use crate::error::{CredbError, Result};
use crate::session::state::{ConnectionState, ServerHandshakeState};

/// Message 1 of 4: the server announces its enclave group, its
/// identity, and (per §9) whether it is a downstream replica and, if
/// so, its upstream's public key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TellGroupId {
    /// Opaque enclave measurement group identifier.
    pub group_id: Vec<u8>,
    /// The server's human-readable name, checked by the client.
    pub server_name: String,
    /// The server's ECDSA-P256 identity public key (SEC1 encoded).
    pub server_pubkey: Vec<u8>,
    /// Whether this server is a downstream replica.
    pub downstream: bool,
    /// If downstream, the upstream's public key (used to verify
    /// witnesses originated further up the replication chain).
    pub upstream_pubkey: Option<Vec<u8>>,
}

/// Message 2 of 4: the client's reply, carrying its own identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupIdResponse {
    /// Whether the client accepts the server's announced identity.
    pub ok: bool,
    /// The client's human-readable name.
    pub client_name: String,
    /// The client's ECDSA-P256 identity public key (SEC1 encoded).
    pub client_pubkey: Vec<u8>,
}

/// Server → client: the server's fresh ephemeral Diffie-Hellman point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationMessage1 {
    /// The server's ephemeral DH public point, SEC1 encoded.
    pub g_a: Vec<u8>,
}

/// Client → server: the client's ephemeral point plus proof of identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationMessage2 {
    /// The client's ephemeral DH public point, SEC1 encoded.
    pub g_b: Vec<u8>,
    /// `Sign_client(g_b ‖ g_a)`, DER encoded.
    pub sig_gb_ga: Vec<u8>,
    /// `CMAC-SMK` over `(g_b ‖ g_a)`.
    pub cmac: [u8; 16],
}

/// A stand-in for a hardware attestation quote. Real quote generation
/// and remote verification against an attestation service are an
/// external collaborator's concern (§1); this crate only needs the
/// report-data binding the spec describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    /// `SHA-256(g_a ‖ g_b ‖ VK)`, the value real report-data would bind.
    pub report_data: [u8; 32],
}

/// Server → client: re-asserts `g_a` and carries the attestation quote.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationMessage3 {
    /// The server's ephemeral DH public point, repeated for binding.
    pub g_a: Vec<u8>,
    /// The attestation quote.
    pub quote: Quote,
    /// `CMAC-SMK` over `(g_a ‖ quote.report_data)`.
    pub cmac: [u8; 16],
}

/// Message 4 of 4: the final verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationResult {
    /// Whether the server accepts the handshake as successfully
    /// completed.
    pub status: bool,
    /// Opaque platform info blob (advisory; not interpreted here).
    pub platform_info: Vec<u8>,
    /// `CMAC-MK(platform_info)`.
    pub mac: [u8; 16],
}

fn concat(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    out.extend_from_slice(a);
    out.extend_from_slice(b);
    out
}

/// The client side of the handshake.
pub struct ClientHandshake {
    state: ConnectionState,
    client_identity: Identity,
    expected_server_name: String,
    client_name: String,
    server_pubkey: Option<PublicKey>,
    downstream: bool,
    upstream_pubkey: Option<Vec<u8>>,
    ephemeral: Option<EphemeralKeypair>,
    g_a: Option<Vec<u8>>,
    g_b: Option<Vec<u8>>,
    keys: Option<SessionKeys>,
}

impl ClientHandshake {
    /// Begins a handshake expecting the server to announce
    /// `expected_server_name`.
    pub fn new(client_identity: Identity, client_name: impl Into<String>, expected_server_name: impl Into<String>) -> Self {
        Self {
            state: ConnectionState::WaitingForGroupId,
            client_identity,
            expected_server_name: expected_server_name.into(),
            client_name: client_name.into(),
            server_pubkey: None,
            downstream: false,
            upstream_pubkey: None,
            ephemeral: None,
            g_a: None,
            g_b: None,
            keys: None,
        }
    }

    /// The handshake's current state.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Processes `TellGroupId`, checking the server's announced name
    /// against the one this client expects (§8 scenario 6).
    pub fn on_tell_group_id(&mut self, msg: &TellGroupId) -> Result<GroupIdResponse> {
        if msg.server_name != self.expected_server_name {
            self.state = ConnectionState::Failure("Server names don't match".to_string());
            return Err(CredbError::protocol("Server names don't match"));
        }
        let server_pubkey = PublicKey::from_sec1_bytes(&msg.server_pubkey)?;
        self.server_pubkey = Some(server_pubkey);
        self.downstream = msg.downstream;
        self.upstream_pubkey = msg.upstream_pubkey.clone();
        self.state = ConnectionState::WaitingForMsg1;
        Ok(GroupIdResponse {
            ok: true,
            client_name: self.client_name.clone(),
            client_pubkey: self.client_identity.public_key().to_sec1_bytes(),
        })
    }

    /// Processes `AttestationMessage1`, generating the client's own
    /// ephemeral key, deriving the session keys, and signing `(g_b‖g_a)`.
    pub fn on_attestation_message1(&mut self, msg: &AttestationMessage1) -> Result<AttestationMessage2> {
        if !matches!(self.state, ConnectionState::WaitingForMsg1) {
            return Err(CredbError::protocol("unexpected AttestationMessage1"));
        }
        let ephemeral = EphemeralKeypair::generate();
        let shared_secret = ephemeral.shared_secret(&msg.g_a)?;
        let keys = SessionKeys::derive(&shared_secret);

        let g_b = ephemeral.public_bytes();
        let g_a = msg.g_a.clone();
        let signed = concat(&g_b, &g_a);
        let sig_gb_ga = self.client_identity.sign(&signed);
        let cmac = cmac_tag(&keys.smk, &signed);

        self.ephemeral = Some(ephemeral);
        self.g_a = Some(g_a);
        self.g_b = Some(g_b.clone());
        self.keys = Some(keys);
        self.state = ConnectionState::WaitingForMsg3;

        Ok(AttestationMessage2 { g_b, sig_gb_ga, cmac })
    }

    /// Processes `AttestationMessage3`, verifying the CMAC and the
    /// report-data hash that binds the quote to this handshake.
    pub fn on_attestation_message3(&mut self, msg: &AttestationMessage3) -> Result<()> {
        if !matches!(self.state, ConnectionState::WaitingForMsg3) {
            return Err(CredbError::protocol("unexpected AttestationMessage3"));
        }
        let keys = self.keys.as_ref().expect("keys derived in on_attestation_message1");
        let g_a = self.g_a.as_ref().expect("g_a recorded in on_attestation_message1");
        let g_b = self.g_b.as_ref().expect("g_b recorded in on_attestation_message1");

        let bound = concat(g_a, &msg.quote.report_data);
        if !cmac_verify(&keys.smk, &bound, &msg.cmac) {
            self.state = ConnectionState::Failure("msg3 CMAC verification failed".to_string());
            return Err(CredbError::integrity("msg3 CMAC verification failed"));
        }

        let mut hasher = Sha256::new();
        hasher.update(g_a);
        hasher.update(g_b);
        hasher.update(keys.vk.as_bytes());
        let expected: [u8; 32] = hasher.finalize().into();
        if expected != msg.quote.report_data {
            self.state = ConnectionState::Failure("attestation report-data mismatch".to_string());
            return Err(CredbError::integrity("attestation report-data mismatch"));
        }
        Ok(())
    }

    /// Processes the final `AttestationResult`, completing the
    /// handshake on success.
    pub fn on_attestation_result(&mut self, msg: &AttestationResult) -> Result<()> {
        let keys = self.keys.as_ref().ok_or_else(|| CredbError::protocol("handshake not far enough along"))?;
        if !cmac_verify(&keys.mk, &msg.platform_info, &msg.mac) {
            self.state = ConnectionState::Failure("AttestationResult MAC verification failed".to_string());
            return Err(CredbError::integrity("AttestationResult MAC verification failed"));
        }
        if !msg.status {
            self.state = ConnectionState::Failure("server rejected attestation".to_string());
            return Err(CredbError::protocol("server rejected attestation"));
        }
        self.state = ConnectionState::Connected;
        Ok(())
    }

    /// The derived session data key, once connected.
    pub fn session_key(&self) -> Option<&Key128> {
        self.keys.as_ref().map(|k| &k.sk)
    }
}

/// The server side of the handshake.
pub struct ServerHandshake {
    state: ServerHandshakeState,
    identity: Identity,
    group_id: Vec<u8>,
    server_name: String,
    downstream: bool,
    upstream_pubkey: Option<Vec<u8>>,
    client_pubkey: Option<PublicKey>,
    client_name: Option<String>,
    ephemeral: Option<EphemeralKeypair>,
    g_a: Option<Vec<u8>>,
    keys: Option<SessionKeys>,
}

impl ServerHandshake {
    /// Begins a fresh handshake on the server side.
    pub fn new(
        identity: Identity,
        group_id: Vec<u8>,
        server_name: impl Into<String>,
        downstream: bool,
        upstream_pubkey: Option<Vec<u8>>,
    ) -> Self {
        Self {
            state: ServerHandshakeState::WaitingForGroupIdResponse,
            identity,
            group_id,
            server_name: server_name.into(),
            downstream,
            upstream_pubkey,
            client_pubkey: None,
            client_name: None,
            ephemeral: None,
            g_a: None,
            keys: None,
        }
    }

    /// The handshake's current state.
    pub fn state(&self) -> &ServerHandshakeState {
        &self.state
    }

    /// The first message the server sends on every new connection.
    pub fn tell_group_id(&self) -> TellGroupId {
        TellGroupId {
            group_id: self.group_id.clone(),
            server_name: self.server_name.clone(),
            server_pubkey: self.identity.public_key().to_sec1_bytes(),
            downstream: self.downstream,
            upstream_pubkey: self.upstream_pubkey.clone(),
        }
    }

    /// Processes the client's `GroupIdResponse`, then generates and
    /// returns `AttestationMessage1`.
    pub fn on_group_id_response(&mut self, msg: &GroupIdResponse) -> Result<AttestationMessage1> {
        if !msg.ok {
            self.state = ServerHandshakeState::Failure("client declined handshake".to_string());
            return Err(CredbError::protocol("client declined handshake"));
        }
        self.client_pubkey = Some(PublicKey::from_sec1_bytes(&msg.client_pubkey)?);
        self.client_name = Some(msg.client_name.clone());

        let ephemeral = EphemeralKeypair::generate();
        let g_a = ephemeral.public_bytes();
        self.ephemeral = Some(ephemeral);
        self.g_a = Some(g_a.clone());
        self.state = ServerHandshakeState::WaitingForMsg2;
        Ok(AttestationMessage1 { g_a })
    }

    /// Processes `AttestationMessage2`: derives the session keys,
    /// verifies the client's CMAC and identity signature, then returns
    /// `AttestationMessage3`.
    pub fn on_attestation_message2(&mut self, msg: &AttestationMessage2) -> Result<AttestationMessage3> {
        if !matches!(self.state, ServerHandshakeState::WaitingForMsg2) {
            return Err(CredbError::protocol("unexpected AttestationMessage2"));
        }
        let ephemeral = self.ephemeral.as_ref().expect("ephemeral generated in on_group_id_response");
        let g_a = self.g_a.clone().expect("g_a recorded in on_group_id_response");
        let shared_secret = ephemeral.shared_secret(&msg.g_b)?;
        let keys = SessionKeys::derive(&shared_secret);

        let signed = concat(&msg.g_b, &g_a);
        if !cmac_verify(&keys.smk, &signed, &msg.cmac) {
            self.state = ServerHandshakeState::Failure("msg2 CMAC verification failed".to_string());
            return Err(CredbError::integrity("msg2 CMAC verification failed"));
        }
        let client_pubkey = self.client_pubkey.as_ref().expect("client_pubkey recorded in on_group_id_response");
        if !client_pubkey.verify(&signed, &msg.sig_gb_ga) {
            self.state = ServerHandshakeState::Failure("client identity signature invalid".to_string());
            return Err(CredbError::integrity("client identity signature invalid"));
        }

        let mut hasher = Sha256::new();
        hasher.update(&g_a);
        hasher.update(&msg.g_b);
        hasher.update(keys.vk.as_bytes());
        let report_data: [u8; 32] = hasher.finalize().into();
        let bound = concat(&g_a, &report_data);
        let cmac = cmac_tag(&keys.smk, &bound);

        self.keys = Some(keys);
        Ok(AttestationMessage3 {
            g_a,
            quote: Quote { report_data },
            cmac,
        })
    }

    /// Produces the final `AttestationResult` and completes the
    /// handshake on the server side.
    pub fn attestation_result(&mut self) -> Result<AttestationResult> {
        let keys = self.keys.as_ref().ok_or_else(|| CredbError::protocol("handshake not far enough along"))?;
        let platform_info = b"credb-core".to_vec();
        let mac = cmac_tag(&keys.mk, &platform_info);
        self.state = ServerHandshakeState::Connected;
        Ok(AttestationResult {
            status: true,
            platform_info,
            mac,
        })
    }

    /// The derived session data key, once connected.
    pub fn session_key(&self) -> Option<&Key128> {
        self.keys.as_ref().map(|k| &k.sk)
    }

    /// The verified client's announced name, once known.
    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_full_handshake() -> (ClientHandshake, ServerHandshake) {
        let server_identity = Identity::generate();
        let client_identity = Identity::generate();

        let mut server = ServerHandshake::new(server_identity, vec![1, 2, 3], "credb-node-a", false, None);
        let mut client = ClientHandshake::new(client_identity, "client-1", "credb-node-a");

        let tell = server.tell_group_id();
        let resp = client.on_tell_group_id(&tell).unwrap();
        let msg1 = server.on_group_id_response(&resp).unwrap();
        let msg2 = client.on_attestation_message1(&msg1).unwrap();
        let msg3 = server.on_attestation_message2(&msg2).unwrap();
        client.on_attestation_message3(&msg3).unwrap();
        let result = server.attestation_result().unwrap();
        client.on_attestation_result(&result).unwrap();

        (client, server)
    }

    #[test]
    fn full_handshake_reaches_connected_on_both_sides_with_matching_keys() {
        let (client, server) = run_full_handshake();
        assert!(client.state().is_connected());
        assert!(server.state().is_connected());
        assert_eq!(client.session_key().unwrap().as_bytes(), server.session_key().unwrap().as_bytes());
        assert_eq!(server.client_name(), Some("client-1"));
    }

    #[test]
    fn mismatched_server_name_fails_with_exact_message() {
        let server_identity = Identity::generate();
        let client_identity = Identity::generate();
        let server = ServerHandshake::new(server_identity, vec![], "real-server", false, None);
        let mut client = ClientHandshake::new(client_identity, "client-1", "expected-server");

        let tell = server.tell_group_id();
        let err = client.on_tell_group_id(&tell).unwrap_err();
        match err {
            CredbError::Protocol(msg) => assert_eq!(msg, "Server names don't match"),
            other => panic!("expected protocol error, got {other:?}"),
        }
        assert_eq!(client.state(), &ConnectionState::Failure("Server names don't match".to_string()));
    }

    #[test]
    fn tampered_quote_is_rejected_by_client() {
        let server_identity = Identity::generate();
        let client_identity = Identity::generate();
        let mut server = ServerHandshake::new(server_identity, vec![], "node-a", false, None);
        let mut client = ClientHandshake::new(client_identity, "client-1", "node-a");

        let tell = server.tell_group_id();
        let resp = client.on_tell_group_id(&tell).unwrap();
        let msg1 = server.on_group_id_response(&resp).unwrap();
        let msg2 = client.on_attestation_message1(&msg1).unwrap();
        let mut msg3 = server.on_attestation_message2(&msg2).unwrap();
        msg3.quote.report_data[0] ^= 0xFF;

        assert!(client.on_attestation_message3(&msg3).is_err());
    }

    #[test]
    fn downstream_hand_off_is_carried_to_the_client() {
        let server_identity = Identity::generate();
        let client_identity = Identity::generate();
        let upstream_pubkey = Identity::generate().public_key().to_sec1_bytes();
        let server = ServerHandshake::new(server_identity, vec![], "node-b", true, Some(upstream_pubkey.clone()));
        let mut client = ClientHandshake::new(client_identity, "client-1", "node-b");

        let tell = server.tell_group_id();
        assert!(tell.downstream);
        assert_eq!(tell.upstream_pubkey.as_deref(), Some(upstream_pubkey.as_slice()));
        client.on_tell_group_id(&tell).unwrap();
        assert!(client.downstream);
        assert_eq!(client.upstream_pubkey.as_deref(), Some(upstream_pubkey.as_slice()));
    }
}
