//! End-to-end attested handshake between independently driven client
//! and server state machines, and the wire framing/envelope a real
//! connection would layer underneath it.

use credb::crypto::envelope::{self, Direction};
use credb::crypto::signing::Identity;
use credb::session::frame::{decode_encrypted_payload, decode_frame, encode_encrypted_payload, encode_frame, EncTag};
use credb::session::handshake::{ClientHandshake, ServerHandshake};
use credb::session::state::{ConnectionState, ServerHandshakeState};

fn run_handshake(server_name: &str, client_expected: &str) -> Result<(ClientHandshake, ServerHandshake), credb::CredbError> {
    let server_identity = Identity::generate();
    let client_identity = Identity::generate();
    let mut server = ServerHandshake::new(server_identity, b"group-1".to_vec(), server_name, false, None);
    let mut client = ClientHandshake::new(client_identity, "client-a", client_expected);

    let tell = server.tell_group_id();
    let resp = client.on_tell_group_id(&tell)?;
    let msg1 = server.on_group_id_response(&resp)?;
    let msg2 = client.on_attestation_message1(&msg1)?;
    let msg3 = server.on_attestation_message2(&msg2)?;
    client.on_attestation_message3(&msg3)?;
    let result = server.attestation_result()?;
    client.on_attestation_result(&result)?;
    Ok((client, server))
}

#[test]
fn a_full_handshake_yields_matching_session_keys_on_both_sides() {
    let (client, server) = run_handshake("credb-node", "credb-node").unwrap();
    assert!(matches!(client.state(), ConnectionState::Connected));
    assert!(matches!(server.state(), ServerHandshakeState::Connected));
    assert_eq!(client.session_key().unwrap().as_bytes(), server.session_key().unwrap().as_bytes());
}

#[test]
fn a_name_mismatch_is_rejected_before_any_key_material_is_derived() {
    let err = run_handshake("real-name", "expected-name").unwrap_err();
    match err {
        credb::CredbError::Protocol(msg) => assert_eq!(msg, "Server names don't match"),
        other => panic!("expected a protocol error, got {other:?}"),
    }
}

#[test]
fn post_handshake_frames_encrypt_and_decrypt_under_the_shared_session_key() {
    let (client, server) = run_handshake("credb-node", "credb-node").unwrap();
    let client_key = client.session_key().unwrap().clone();
    let server_key = server.session_key().unwrap().clone();

    let request = br#"{"op": "nop"}"#;
    let sealed = envelope::seal(&client_key, 0, Direction::ClientToServer, request);
    let body = encode_encrypted_payload(&sealed).unwrap();
    let frame = encode_frame(EncTag::Encrypted, &body);

    let (tag, decoded_body, consumed) = decode_frame(&frame).unwrap().unwrap();
    assert_eq!(tag, EncTag::Encrypted);
    assert_eq!(consumed, frame.len());
    let resealed = decode_encrypted_payload(decoded_body).unwrap();
    let opened = envelope::open(&server_key, 0, Direction::ClientToServer, &resealed).unwrap();
    assert_eq!(opened, request);
}
