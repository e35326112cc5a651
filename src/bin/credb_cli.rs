//! Binary entry point for the CreDB administrative/client CLI: opens a
//! session against a running server and issues a single operation.
#![forbid(unsafe_code)]

use clap::{Parser, Subcommand};
use serde_json::{json, Value as Json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use credb::crypto::envelope::{self, Direction};
use credb::crypto::kdf::Key128;
use credb::crypto::signing::Identity;
use credb::session::frame::{decode_encrypted_payload, decode_frame, encode_encrypted_payload, encode_frame, EncTag};
use credb::session::handshake::{AttestationMessage1, AttestationMessage3, AttestationResult, ClientHandshake, TellGroupId};
use credb::session::op::{Correlation, MessageType, OperationCode, OperationRequest, OperationResponse, ResponseBody};

#[derive(Parser, Debug)]
#[command(name = "credb-cli", version, about = "CreDB client CLI")]
struct Cli {
    /// Server address to connect to.
    #[arg(long, default_value = "127.0.0.1:5042")]
    server: String,

    /// Server name this client expects to see in the handshake.
    #[arg(long, default_value = "credb-node")]
    expected_server_name: String,

    /// This client's human-readable name.
    #[arg(long, default_value = "credb-cli")]
    client_name: String,

    /// Skips the attested handshake, matching a server run with `--unsafe-mode`.
    #[arg(long)]
    unsafe_mode: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Liveness check.
    Nop,
    /// Writes a full value under `key`.
    Put { collection: String, key: String, value: String },
    /// Writes a full value under a server-generated key.
    PutWithoutKey { collection: String, value: String },
    /// Reads a key's current value.
    Get { collection: String, key: String },
    /// Deletes a key.
    Remove { collection: String, key: String },
    /// Removes every key in a collection.
    Clear { collection: String },
    /// Checks whether a key exists.
    Has { collection: String, key: String },
    /// Shallow-merges a patch into an existing value.
    Add { collection: String, key: String, patch: String },
    /// Finds keys matching an equality-predicate object (JSON), e.g. '{"status":"active"}'.
    Find { collection: String, predicates: String },
    /// Counts keys matching an equality-predicate object.
    Count { collection: String, predicates: String },
    /// Creates a secondary index over a document path.
    CreateIndex { collection: String, path: String },
    /// Drops a secondary index.
    DropIndex { collection: String, path: String },
    /// Lists known peers.
    ListPeers,
    /// Registers a peer.
    Peer { address: String, server_name: String },
    /// Exports the full store, base64-encoded, to stdout.
    DumpEverything,
    /// Retrieves server statistics.
    GetStatistics,
}

fn command_to_request(command: Command) -> (OperationCode, Json) {
    match command {
        Command::Nop => (OperationCode::Nop, json!({})),
        Command::Put { collection, key, value } => (
            OperationCode::PutObject,
            json!({"collection": collection, "key": key, "value": parse_json(&value)}),
        ),
        Command::PutWithoutKey { collection, value } => (
            OperationCode::PutObjectWithoutKey,
            json!({"collection": collection, "value": parse_json(&value)}),
        ),
        Command::Get { collection, key } => (OperationCode::GetObject, json!({"collection": collection, "key": key})),
        Command::Remove { collection, key } => (OperationCode::RemoveObject, json!({"collection": collection, "key": key})),
        Command::Clear { collection } => (OperationCode::Clear, json!({"collection": collection})),
        Command::Has { collection, key } => (OperationCode::HasObject, json!({"collection": collection, "key": key})),
        Command::Add { collection, key, patch } => (
            OperationCode::AddToObject,
            json!({"collection": collection, "key": key, "value": parse_json(&patch)}),
        ),
        Command::Find { collection, predicates } => (
            OperationCode::FindObjects,
            json!({"collection": collection, "predicates": parse_json(&predicates)}),
        ),
        Command::Count { collection, predicates } => (
            OperationCode::CountObjects,
            json!({"collection": collection, "predicates": parse_json(&predicates)}),
        ),
        Command::CreateIndex { collection, path } => (OperationCode::CreateIndex, json!({"collection": collection, "path": path})),
        Command::DropIndex { collection, path } => (OperationCode::DropIndex, json!({"collection": collection, "path": path})),
        Command::ListPeers => (OperationCode::ListPeers, json!({})),
        Command::Peer { address, server_name } => (OperationCode::Peer, json!({"address": address, "server_name": server_name})),
        Command::DumpEverything => (OperationCode::DumpEverything, json!({})),
        Command::GetStatistics => (OperationCode::GetStatistics, json!({})),
    }
}

fn parse_json(raw: &str) -> Json {
    serde_json::from_str(raw).unwrap_or_else(|_| Json::String(raw.to_string()))
}

fn load_or_generate_client_identity(client_name: &str) -> anyhow::Result<Identity> {
    let path = format!("{client_name}.identity");
    if let Ok(bytes) = std::fs::read(&path) {
        return Ok(Identity::from_bytes(&bytes)?);
    }
    let identity = Identity::generate();
    std::fs::write(&path, identity.to_bytes())?;
    Ok(identity)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut socket = TcpStream::connect(&cli.server).await?;

    let session_key = if cli.unsafe_mode {
        None
    } else {
        let identity = load_or_generate_client_identity(&cli.client_name)?;
        let mut handshake = ClientHandshake::new(identity, cli.client_name.clone(), cli.expected_server_name.clone());
        let tell: TellGroupId = read_json(&mut socket).await?;
        let resp = handshake.on_tell_group_id(&tell)?;
        write_json(&mut socket, EncTag::Attestation, &resp).await?;
        let msg1: AttestationMessage1 = read_json(&mut socket).await?;
        let msg2 = handshake.on_attestation_message1(&msg1)?;
        write_json(&mut socket, EncTag::Attestation, &msg2).await?;
        let msg3: AttestationMessage3 = read_json(&mut socket).await?;
        handshake.on_attestation_message3(&msg3)?;
        let result: AttestationResult = read_json(&mut socket).await?;
        handshake.on_attestation_result(&result)?;
        Some(handshake.session_key().expect("connected handshake has a session key").clone())
    };

    let (op, args) = command_to_request(cli.command);
    let correlation = Correlation { task_id: 1, op_id: 1 };
    let request = OperationRequest { correlation, op, args };
    let mut payload = vec![MessageType::OperationRequest as u8];
    payload.extend_from_slice(&serde_json::to_vec(&request)?);

    match &session_key {
        Some(sk) => {
            let sealed = envelope::seal(sk, 0, Direction::ClientToServer, &payload);
            let body = encode_encrypted_payload(&sealed)?;
            socket.write_all(&encode_frame(EncTag::Encrypted, &body)).await?;
        }
        None => {
            socket.write_all(&encode_frame(EncTag::Plaintext, &payload)).await?;
        }
    }

    let response_bytes = read_response_frame(&mut socket, &session_key).await?;
    let message_type = MessageType::try_from(response_bytes[0])?;
    if !matches!(message_type, MessageType::OperationResponse) {
        anyhow::bail!("expected an operation response, got {message_type:?}");
    }
    let response: OperationResponse = serde_json::from_slice(&response_bytes[1..])?;
    match response.body {
        ResponseBody::Ok { value, witness } => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            if let Some(witness) = witness {
                println!("{witness}");
            }
        }
        ResponseBody::Err { message } => {
            eprintln!("error: {message}");
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn read_response_frame(socket: &mut TcpStream, session_key: &Option<Key128>) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut scratch = [0u8; 4096];
    loop {
        if let Some((tag, body, consumed)) = decode_frame(&buf)? {
            let body = body.to_vec();
            buf.drain(..consumed);
            return match tag {
                EncTag::Plaintext => Ok(body),
                EncTag::Encrypted => {
                    let sk = session_key.as_ref().ok_or_else(|| anyhow::anyhow!("received encrypted frame without a session key"))?;
                    let sealed = decode_encrypted_payload(&body)?;
                    Ok(envelope::open(sk, 0, Direction::ServerToClient, &sealed)?)
                }
                EncTag::Attestation => anyhow::bail!("unexpected attestation frame after handshake"),
            };
        }
        let n = socket.read(&mut scratch).await?;
        if n == 0 {
            anyhow::bail!("connection closed before a response arrived");
        }
        buf.extend_from_slice(&scratch[..n]);
    }
}

async fn write_json<T: serde::Serialize>(socket: &mut TcpStream, tag: EncTag, value: &T) -> anyhow::Result<()> {
    let body = serde_json::to_vec(value)?;
    socket.write_all(&encode_frame(tag, &body)).await?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(socket: &mut TcpStream) -> anyhow::Result<T> {
    let mut buf = Vec::new();
    let mut scratch = [0u8; 4096];
    loop {
        if let Some((_, body, consumed)) = decode_frame(&buf)? {
            let value = serde_json::from_slice(body)?;
            buf.drain(..consumed);
            return Ok(value);
        }
        let n = socket.read(&mut scratch).await?;
        if n == 0 {
            anyhow::bail!("connection closed mid-handshake");
        }
        buf.extend_from_slice(&scratch[..n]);
    }
}
