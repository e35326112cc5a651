//! Server configuration.
//!
//! Loading configuration from a file or CLI flags is an external
//! collaborator's job (the `credb-cli`/`credb-server` binaries only
//! populate this struct); the struct and its defaults live in the core
//! so that both the binaries and the test suite share one source of
//! truth, mirroring the teacher's `Config`/`SyncMode` split.

use std::path::PathBuf;

use crate::pager::EvictionPolicyKind;

/// Default port for client connections (§6).
pub const DEFAULT_CLIENT_PORT: u16 = 5042;
/// Default port for peer (replica) connections (§6).
pub const DEFAULT_PEER_PORT: u16 = 5043;

/// Top-level server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one encrypted blob per page (`NNN.page`), the
    /// sealed disk-key file, and the server's identity keypair.
    pub data_dir: PathBuf,
    /// Byte budget for the buffer manager.
    pub buffer_budget_bytes: usize,
    /// Eviction policy used by the buffer manager.
    pub eviction_policy: EvictionPolicyKind,
    /// Page size in bytes.
    pub page_size: usize,
    /// Listen address for client connections.
    pub client_listen: String,
    /// Listen address for peer (replica) connections.
    pub peer_listen: String,
    /// Disables the attested handshake and session encryption. A
    /// deployment-time flag only, never a per-request choice (§4.F).
    pub unsafe_mode: bool,
    /// Whether this server is a downstream replica.
    pub downstream: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./credb-data"),
            buffer_budget_bytes: 64 * 1024 * 1024,
            eviction_policy: EvictionPolicyKind::Lru,
            page_size: 8192,
            client_listen: format!("0.0.0.0:{DEFAULT_CLIENT_PORT}"),
            peer_listen: format!("0.0.0.0:{DEFAULT_PEER_PORT}"),
            unsafe_mode: false,
            downstream: false,
        }
    }
}

impl Config {
    /// A configuration suited to local testing: small buffer budget,
    /// encryption disabled so no attestation hardware is required.
    pub fn unsafe_local(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            buffer_budget_bytes: 4 * 1024 * 1024,
            unsafe_mode: true,
            ..Default::default()
        }
    }
}
