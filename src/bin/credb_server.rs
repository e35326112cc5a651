//! Binary entry point for the CreDB server.
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use credb::crypto::block_io::{DiskKey, LocalBlockStore};
use credb::crypto::envelope::{self, Direction};
use credb::crypto::signing::Identity;
use credb::pager::{BufferManager, EvictionPolicyKind};
use credb::peer::DownstreamInfo;
use credb::session::dispatch::{Dispatcher, ServerState};
use credb::session::frame::{decode_encrypted_payload, decode_frame, encode_encrypted_payload, encode_frame, EncTag};
use credb::session::handshake::{AttestationMessage2, GroupIdResponse, ServerHandshake};
use credb::session::op::{MessageType, OperationRequest, OperationResponse};
use credb::session::state::ServerHandshakeState;

#[derive(Parser, Debug)]
#[command(name = "credb-server", version, about = "CreDB authenticated document store server")]
struct Cli {
    /// Directory holding page blobs, the sealed disk key, and this server's identity.
    #[arg(long, default_value = "./credb-data")]
    data_dir: PathBuf,

    /// Listen address for client connections.
    #[arg(long, default_value = "0.0.0.0:5042")]
    client_listen: String,

    /// Number of shards to partition the store into.
    #[arg(long, default_value_t = 8)]
    shards: u32,

    /// Byte budget for the buffer manager.
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    buffer_budget_bytes: usize,

    /// This server's advertised name, checked by connecting clients.
    #[arg(long, default_value = "credb-node")]
    server_name: String,

    /// Disables the attested handshake and session encryption.
    #[arg(long)]
    unsafe_mode: bool,

    /// Marks this server as a downstream replica.
    #[arg(long)]
    downstream: bool,

    /// Path to the upstream's SEC1-encoded public key, required with --downstream.
    #[arg(long)]
    upstream_pubkey: Option<PathBuf>,
}

fn load_or_generate_identity(path: &std::path::Path) -> std::io::Result<Identity> {
    if let Ok(bytes) = std::fs::read(path) {
        return Identity::from_bytes(&bytes).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()));
    }
    let identity = Identity::generate();
    std::fs::write(path, identity.to_bytes())?;
    Ok(identity)
}

fn load_or_generate_disk_key(path: &std::path::Path) -> std::io::Result<DiskKey> {
    if let Ok(bytes) = std::fs::read(path) {
        let mut key = [0u8; 16];
        if bytes.len() == 16 {
            key.copy_from_slice(&bytes);
            return Ok(DiskKey(key));
        }
    }
    let key: [u8; 16] = rand::random();
    std::fs::write(path, key)?;
    Ok(DiskKey(key))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    std::fs::create_dir_all(&cli.data_dir)?;

    let identity = load_or_generate_identity(&cli.data_dir.join("server.identity"))?;
    let disk_key = load_or_generate_disk_key(&cli.data_dir.join("disk.key"))?;
    let store = Arc::new(LocalBlockStore::open(cli.data_dir.join("pages"), disk_key)?);
    let pager = BufferManager::new(store, cli.buffer_budget_bytes, EvictionPolicyKind::Lru);

    let upstream_pubkey = match &cli.upstream_pubkey {
        Some(path) => Some(std::fs::read(path)?),
        None => None,
    };
    if cli.downstream && upstream_pubkey.is_none() {
        anyhow::bail!("--downstream requires --upstream-pubkey");
    }
    let downstream = DownstreamInfo {
        downstream: cli.downstream,
        upstream_pubkey,
    };

    let server = Arc::new(ServerState::new(cli.server_name.clone(), cli.shards, identity, pager, downstream));

    let listener = TcpListener::bind(&cli.client_listen).await?;
    info!(addr = %cli.client_listen, server_name = %cli.server_name, "listening for client connections");

    let connection_id = Arc::new(AtomicU64::new(0));
    let unsafe_mode = cli.unsafe_mode;

    loop {
        let (socket, peer_addr) = listener.accept().await?;
        let server = server.clone();
        let connection_id = connection_id.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(async move {
            if let Err(err) = handle_connection(socket, server, connection_id, unsafe_mode).await {
                warn!(%peer_addr, connection_id, error = %err, "connection ended with an error");
            }
        });
    }
}

async fn handle_connection(
    mut socket: TcpStream,
    server: Arc<ServerState>,
    connection_id: u64,
    unsafe_mode: bool,
) -> anyhow::Result<()> {
    let group_id = connection_id.to_le_bytes().to_vec();
    let mut handshake = ServerHandshake::new(
        server.identity.clone(),
        group_id,
        server.server_name.clone(),
        server.peers.downstream_info().downstream,
        server.peers.downstream_info().upstream_pubkey.clone(),
    );

    let session_key = if unsafe_mode {
        None
    } else {
        let tell = handshake.tell_group_id();
        write_json(&mut socket, EncTag::Attestation, &tell).await?;
        let resp: GroupIdResponse = read_json(&mut socket).await?;
        let msg1 = handshake.on_group_id_response(&resp)?;
        write_json(&mut socket, EncTag::Attestation, &msg1).await?;
        let msg2: AttestationMessage2 = read_json(&mut socket).await?;
        let msg3 = handshake.on_attestation_message2(&msg2)?;
        write_json(&mut socket, EncTag::Attestation, &msg3).await?;
        let result = handshake.attestation_result()?;
        write_json(&mut socket, EncTag::Attestation, &result).await?;
        if !matches!(handshake.state(), ServerHandshakeState::Connected) {
            anyhow::bail!("handshake did not reach Connected");
        }
        Some(handshake.session_key().expect("connected handshake has a session key").clone())
    };

    let (trigger_tx, mut trigger_rx) = tokio::sync::mpsc::unbounded_channel();
    let dispatcher = Dispatcher::new(server, connection_id, trigger_tx);

    let mut recv_seq: u32 = 0;
    let mut send_seq: u32 = 0;
    let mut buf = Vec::new();
    let mut scratch = [0u8; 4096];

    loop {
        tokio::select! {
            n = socket.read(&mut scratch) => {
                let n = n?;
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&scratch[..n]);
                loop {
                    let parsed = decode_frame(&buf)?;
                    let Some((tag, body, consumed)) = parsed else { break };
                    let body = body.to_vec();
                    buf.drain(..consumed);

                    let plaintext = match tag {
                        EncTag::Plaintext => body,
                        EncTag::Encrypted => {
                            let sk = session_key.as_ref().ok_or_else(|| anyhow::anyhow!("encrypted frame before handshake completed"))?;
                            let sealed = decode_encrypted_payload(&body)?;
                            let opened = envelope::open(sk, recv_seq, Direction::ClientToServer, &sealed)?;
                            recv_seq = recv_seq.wrapping_add(1);
                            opened
                        }
                        EncTag::Attestation => anyhow::bail!("unexpected attestation frame after handshake"),
                    };

                    if plaintext.is_empty() {
                        continue;
                    }
                    let message_type = MessageType::try_from(plaintext[0])?;
                    match message_type {
                        MessageType::OperationRequest => {
                            let request: OperationRequest = serde_json::from_slice(&plaintext[1..])?;
                            let body = dispatcher.dispatch(request.correlation.task_id, request.op, request.args);
                            let response = OperationResponse { correlation: request.correlation, body };
                            send_seq = write_operation_response(&mut socket, &session_key, send_seq, &response).await?;
                        }
                        other => {
                            warn!(?other, "unexpected message type from client");
                        }
                    }
                }
            }
            Some(collection) = trigger_rx.recv() => {
                let notify = credb::session::op::NotifyTrigger { collection_name: collection };
                let mut payload = vec![MessageType::NotifyTrigger as u8];
                payload.extend_from_slice(&serde_json::to_vec(&notify)?);
                send_seq = write_payload(&mut socket, &session_key, send_seq, &payload).await?;
            }
        }
    }

    dispatcher.close();
    Ok(())
}

async fn write_operation_response(
    socket: &mut TcpStream,
    session_key: &Option<credb::crypto::kdf::Key128>,
    send_seq: u32,
    response: &OperationResponse,
) -> anyhow::Result<u32> {
    let mut payload = vec![MessageType::OperationResponse as u8];
    payload.extend_from_slice(&serde_json::to_vec(response)?);
    write_payload(socket, session_key, send_seq, &payload).await
}

async fn write_payload(
    socket: &mut TcpStream,
    session_key: &Option<credb::crypto::kdf::Key128>,
    send_seq: u32,
    payload: &[u8],
) -> anyhow::Result<u32> {
    match session_key {
        Some(sk) => {
            let sealed = envelope::seal(sk, send_seq, Direction::ServerToClient, payload);
            let body = encode_encrypted_payload(&sealed)?;
            socket.write_all(&encode_frame(EncTag::Encrypted, &body)).await?;
            Ok(send_seq.wrapping_add(1))
        }
        None => {
            socket.write_all(&encode_frame(EncTag::Plaintext, payload)).await?;
            Ok(send_seq)
        }
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
