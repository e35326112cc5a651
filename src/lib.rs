//! # CreDB
//!
//! CreDB is an authenticated, transactional document database designed to
//! run inside a trusted execution environment. Clients connect over an
//! attested, encrypted session and issue document operations against a
//! sharded object store; every committed write is appended to a per-shard
//! ledger that can be distilled into a cryptographically signed witness.
//!
//! ## Architecture
//!
//! - **`crypto`** — encrypted block I/O, the AES-CMAC key schedule, ECDH
//!   key agreement, ECDSA signing, and the session envelope AEAD.
//! - **`pager`** — a size-bounded, pluggable-eviction page cache sitting
//!   on top of `crypto::block_io`.
//! - **`store`** — the per-shard document model: version chains,
//!   collections, predicates, and secondary indexes.
//! - **`ledger`** — the append-only per-shard event log, its partial
//!   ordering, and signed witnesses distilled from it.
//! - **`shard`** — shard routing and the per-shard lock/pager/store/ledger
//!   bundle, with the ascending-shard-id locking discipline multi-shard
//!   transactions depend on.
//! - **`txn`** — isolation levels and the transaction engine (client-side
//!   operation tracking, server-side validation and commit).
//! - **`session`** — the attested handshake, the wire frame envelope,
//!   operation codes, and dispatch.
//! - **`admin`** — statistics and full dump/load.
//! - **`peer`** — the downstream peer registry.

pub mod admin;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod pager;
pub mod peer;
pub mod session;
pub mod shard;
pub mod store;
pub mod txn;

pub use crate::config::Config;
pub use crate::error::{CredbError, Result};
pub use crate::shard::ShardMap;
pub use crate::store::document::{Document, Value};
pub use crate::txn::engine::Transaction;
pub use crate::txn::isolation::IsolationLevel;
