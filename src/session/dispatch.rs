//! Operation dispatch (§4.E, §6): executes a parsed `OperationRequest`
//! against the shard map, the per-task transaction table, the ledger,
//! and the admin/peer/trigger ambient state, producing a
//! `ResponseBody`.
//!
//! Grounded on the teacher's tag-driven dispatch style
//! (`src/storage/record.rs`'s `RecordKind` byte tag on `RecordHeader`),
//! generalized from one record-kind variant per call site to one
//! `OperationCode` per call site.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};

use crate::admin::{self, ServerStats};
use crate::crypto::signing::Identity;
use crate::error::{CredbError, Result};
use crate::ledger::event::EventId;
use crate::ledger::order::{order, order_witnesses, OrderResult};
use crate::ledger::witness::{Witness, WitnessedEvent};
use crate::pager::BufferManager;
use crate::peer::{Peer, PeerRegistry};
use crate::session::op::{OperationCode, ResponseBody};
use crate::session::trigger::TriggerRegistry;
use crate::shard::ShardMap;
use crate::store::predicate::{Predicate, PredicateSet};
use crate::txn::engine::Transaction;
use crate::txn::isolation::IsolationLevel;

/// A sandboxed program runtime, the external collaborator `ExecuteCode`
/// and `CallProgram` delegate to (§1: "a collaborator from which we
/// require only `compile(source) -> bytecode` and `run(bytecode, args,
/// ledger-view) -> value`"). No implementation ships in this crate;
/// a deployment wires one in.
pub trait ProgramRuntime: Send + Sync {
    /// Compiles `source` into an opaque bytecode blob.
    fn compile(&self, source: &[u8]) -> Result<Vec<u8>>;
    /// Runs previously compiled `bytecode` against `args`, with read
    /// access to the current shard map as its ledger view.
    fn run(&self, bytecode: &[u8], args: &Json, shards: &ShardMap) -> Result<Json>;
}

fn isolation_from_args(args: &Json) -> IsolationLevel {
    match args.get("isolation").and_then(Json::as_str) {
        Some("read_committed") => IsolationLevel::ReadCommitted,
        Some("serializable") => IsolationLevel::Serializable,
        _ => IsolationLevel::RepeatableRead,
    }
}

fn require_str<'a>(args: &'a Json, field: &str) -> Result<&'a str> {
    args.get(field)
        .and_then(Json::as_str)
        .ok_or_else(|| CredbError::validation(format!("missing or non-string field [{field}]")))
}

fn require_u32(args: &Json, field: &str) -> Result<u32> {
    args.get(field)
        .and_then(Json::as_u64)
        .map(|v| v as u32)
        .ok_or_else(|| CredbError::validation(format!("missing or non-numeric field [{field}]")))
}

fn require_u64(args: &Json, field: &str) -> Result<u64> {
    args.get(field)
        .and_then(Json::as_u64)
        .ok_or_else(|| CredbError::validation(format!("missing or non-numeric field [{field}]")))
}

fn event_id_from(args: &Json, field: &str) -> Result<EventId> {
    let obj = args
        .get(field)
        .ok_or_else(|| CredbError::validation(format!("missing field [{field}]")))?;
    Ok(EventId::new(
        require_u32(obj, "shard")?,
        require_u64(obj, "block")?,
        require_u32(obj, "index")?,
    ))
}

fn predicate_set_from(args: &Json) -> PredicateSet {
    match args.get("predicates").and_then(Json::as_object) {
        Some(map) => PredicateSet::new(
            map.iter()
                .map(|(path, expected)| Predicate::eq(path.clone(), expected.clone()))
                .collect(),
        ),
        None => PredicateSet::all(),
    }
}

fn random_key() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Serialize, Deserialize)]
struct WitnessEventArg {
    shard: u32,
    block: u64,
    index: u32,
    key: String,
    version: u64,
    operation: String,
}

/// The full state one running server shares across every connection's
/// dispatcher: shards, identity, and the ambient admin/peer/trigger
/// registries. Per-connection state (the task-id-keyed transaction
/// table) lives in `Dispatcher` itself, one per connection.
pub struct ServerState {
    /// This server's advertised name (checked against the client's
    /// expectation in `TellGroupId`).
    pub server_name: String,
    /// The sharded store and ledgers.
    pub shards: ShardMap,
    /// This server's signing identity, used for witnesses.
    pub identity: Identity,
    /// The buffer manager backing this server's pages (`GetStatistics`).
    pub pager: BufferManager,
    /// Process-wide running counters.
    pub stats: ServerStats,
    /// Known peers and this server's downstream hand-off.
    pub peers: PeerRegistry,
    /// Registered trigger subscriptions.
    pub triggers: TriggerRegistry,
    /// Process-wide monotonic transaction sequence counter.
    pub txn_seq: AtomicU64,
    /// The optional sandboxed program runtime backing `ExecuteCode` /
    /// `CallProgram`.
    pub program_runtime: Option<Arc<dyn ProgramRuntime>>,
}

impl ServerState {
    /// Builds server state with empty peer/trigger registries and a
    /// freshly generated identity, suitable for tests and single-node
    /// deployments that provision their own identity out of band.
    pub fn new(
        server_name: impl Into<String>,
        shard_count: u32,
        identity: Identity,
        pager: BufferManager,
        downstream: crate::peer::DownstreamInfo,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            shards: ShardMap::new(shard_count),
            identity,
            pager,
            stats: ServerStats::new(),
            peers: PeerRegistry::new(downstream),
            triggers: TriggerRegistry::new(),
            txn_seq: AtomicU64::new(0),
            program_runtime: None,
        }
    }
}

/// One connection's dispatcher: holds a reference to the shared server
/// state plus this connection's own open transactions, keyed by the
/// client-chosen `task_id` (§4.E: a transaction is a queue of buffered
/// client-side operations; here each task groups the operations of one
/// transaction until it commits).
pub struct Dispatcher {
    server: Arc<ServerState>,
    connection_id: u64,
    transactions: Mutex<HashMap<u32, Transaction>>,
    trigger_tx: crate::session::trigger::TriggerSender,
}

impl Dispatcher {
    /// Creates a dispatcher bound to one connection. `trigger_tx` is
    /// the sending half of the channel the connection's write task
    /// drains to push `NotifyTrigger` frames out over the wire; it is
    /// only handed to the registry once this connection actually
    /// issues `SetTrigger`.
    pub fn new(server: Arc<ServerState>, connection_id: u64, trigger_tx: crate::session::trigger::TriggerSender) -> Self {
        server.stats.session_opened();
        Self {
            server,
            connection_id,
            transactions: Mutex::new(HashMap::new()),
            trigger_tx,
        }
    }

    /// Tears down this connection's state: aborts any still-open
    /// transactions and unregisters its triggers (§5 Cancellation).
    pub fn close(&self) {
        self.transactions.lock().clear();
        self.server.triggers.remove_connection(self.connection_id);
        self.server.stats.session_closed();
    }

    fn with_transaction<R>(&self, task_id: u32, args: &Json, f: impl FnOnce(&mut Transaction) -> R) -> R {
        let mut txns = self.transactions.lock();
        let txn = txns
            .entry(task_id)
            .or_insert_with(|| Transaction::begin(isolation_from_args(args)));
        f(txn)
    }

    /// Executes one operation, returning the response body the caller
    /// sends back (never panics on a malformed request; malformed
    /// requests become `ResponseBody::Err`).
    pub fn dispatch(&self, task_id: u32, op: OperationCode, args: Json) -> ResponseBody {
        match self.dispatch_inner(task_id, op, args) {
            Ok((value, witness)) => ResponseBody::Ok { value, witness },
            Err(err) => ResponseBody::Err { message: err.to_string() },
        }
    }

    fn dispatch_inner(&self, task_id: u32, op: OperationCode, args: Json) -> Result<(Json, Option<String>)> {
        use OperationCode::*;
        match op {
            Nop => Ok((Json::Null, None)),

            ListPeers => {
                let peers = self.server.peers.list_peers();
                Ok((serde_json::to_value(peers).expect("peers serialize"), None))
            }
            Peer => {
                let address = require_str(&args, "address")?.to_string();
                let server_name = require_str(&args, "server_name")?.to_string();
                self.server.peers.add_peer(Peer { address, server_name });
                Ok((Json::Null, None))
            }

            CreateWitness => {
                let events: Vec<WitnessEventArg> = serde_json::from_value(
                    args.get("events").cloned().unwrap_or(Json::Array(Vec::new())),
                )
                .map_err(|_| CredbError::validation("malformed witness event list"))?;
                let witnessed: Vec<WitnessedEvent> = events
                    .into_iter()
                    .map(|e| WitnessedEvent {
                        shard: e.shard,
                        block: e.block,
                        index: e.index,
                        key: e.key,
                        version: e.version,
                        operation: e.operation,
                    })
                    .collect();
                let witness = Witness::assemble(&self.server.server_name, witnessed, &self.server.identity);
                Ok((Json::Null, Some(witness.to_armor())))
            }

            DumpEverything => {
                let bytes = admin::dump_everything(&self.server.shards);
                Ok((json!(BASE64.encode(bytes)), None))
            }
            LoadEverything => {
                let encoded = require_str(&args, "dump")?;
                let bytes = BASE64
                    .decode(encoded)
                    .map_err(|_| CredbError::validation("malformed base64 dump"))?;
                admin::load_everything(&self.server.shards, &bytes)?;
                Ok((Json::Null, None))
            }

            PutObject => {
                let collection = require_str(&args, "collection")?.to_string();
                let key = require_str(&args, "key")?.to_string();
                let value = args.get("value").cloned().unwrap_or(Json::Null);
                self.with_transaction(task_id, &args, |tx| tx.put(&collection, &key, value));
                self.server.triggers.fire(&collection);
                Ok((json!(key), None))
            }
            PutObjectWithoutKey => {
                let collection = require_str(&args, "collection")?.to_string();
                let key = random_key();
                let value = args.get("value").cloned().unwrap_or(Json::Null);
                self.with_transaction(task_id, &args, |tx| tx.put(&collection, &key, value));
                self.server.triggers.fire(&collection);
                Ok((json!(key), None))
            }
            RemoveObject => {
                let collection = require_str(&args, "collection")?.to_string();
                let key = require_str(&args, "key")?.to_string();
                self.with_transaction(task_id, &args, |tx| tx.remove(&collection, &key));
                self.server.triggers.fire(&collection);
                Ok((Json::Null, None))
            }
            Clear => {
                let collection = require_str(&args, "collection")?.to_string();
                for shard_id in 0..self.server.shards.count() {
                    let mut shard = self.server.shards.write(shard_id);
                    let keys = shard.store.find(&collection, &PredicateSet::all());
                    for key in keys {
                        let event_id = shard.ledger.append(
                            collection.clone(),
                            key.clone(),
                            crate::ledger::event::EventKind::Remove,
                            self.server.txn_seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst),
                        );
                        shard.store.apply_remove(&collection, &key, event_id)?;
                    }
                }
                self.server.triggers.fire(&collection);
                Ok((Json::Null, None))
            }

            SetTrigger => {
                let collection = require_str(&args, "collection")?.to_string();
                self.server.triggers.set(&collection, self.connection_id, self.trigger_tx.clone());
                Ok((Json::Null, None))
            }
            UnsetTrigger => {
                let collection = require_str(&args, "collection")?.to_string();
                self.server.triggers.unset(&collection, self.connection_id);
                Ok((Json::Null, None))
            }

            HasObject => {
                let collection = require_str(&args, "collection")?;
                let key = require_str(&args, "key")?;
                let shard_id = self.server.shards.route(collection, key);
                let exists = self.server.shards.read(shard_id).store.has(collection, key);
                Ok((json!(exists), None))
            }
            CheckObject => {
                let collection = require_str(&args, "collection")?.to_string();
                let key = require_str(&args, "key")?.to_string();
                let predicates = predicate_set_from(&args);
                let result = self.with_transaction(task_id, &args, |tx| {
                    tx.check(&self.server.shards, &collection, &key, &predicates)
                });
                Ok((json!(result), None))
            }
            GetObject => {
                let collection = require_str(&args, "collection")?.to_string();
                let key = require_str(&args, "key")?.to_string();
                let value = self.with_transaction(task_id, &args, |tx| tx.get(&self.server.shards, &collection, &key));
                match value {
                    Some(v) => Ok((v.0, None)),
                    None => Err(CredbError::NotFound),
                }
            }
            GetObjectWithWitness => {
                let collection = require_str(&args, "collection")?.to_string();
                let key = require_str(&args, "key")?.to_string();
                let shard_id = self.server.shards.route(&collection, &key);
                let shard = self.server.shards.read(shard_id);
                let value = shard.store.get(&collection, &key).ok_or(CredbError::NotFound)?;
                let event_id = shard.store.latest_event_id(&collection, &key).ok_or(CredbError::NotFound)?;
                let version = shard.store.history(&collection, &key).len() as u64;
                let witnessed = vec![WitnessedEvent {
                    shard: event_id.shard,
                    block: event_id.block,
                    index: event_id.index,
                    key: key.clone(),
                    version,
                    operation: "put".to_string(),
                }];
                let witness = Witness::assemble(&self.server.server_name, witnessed, &self.server.identity);
                Ok((value.0, Some(witness.to_armor())))
            }
            GetObjectHistory => {
                let collection = require_str(&args, "collection")?;
                let key = require_str(&args, "key")?;
                let shard_id = self.server.shards.route(collection, key);
                let history = self.server.shards.read(shard_id).store.history(collection, key);
                let rendered: Vec<Json> = history
                    .iter()
                    .map(|entry| {
                        json!({
                            "event_id": {"shard": entry.event_id.shard, "block": entry.event_id.block, "index": entry.event_id.index},
                            "value": entry.value.as_ref().map(|v| v.0.clone()),
                        })
                    })
                    .collect();
                Ok((Json::Array(rendered), None))
            }

            CreateIndex => {
                let collection = require_str(&args, "collection")?.to_string();
                let path = require_str(&args, "path")?.to_string();
                for shard_id in 0..self.server.shards.count() {
                    self.server.shards.write(shard_id).store.create_index(&collection, &path);
                }
                Ok((Json::Null, None))
            }
            DropIndex => {
                let collection = require_str(&args, "collection")?.to_string();
                let path = require_str(&args, "path")?.to_string();
                for shard_id in 0..self.server.shards.count() {
                    self.server.shards.write(shard_id).store.drop_index(&collection, &path);
                }
                Ok((Json::Null, None))
            }

            DiffVersions => {
                let collection = require_str(&args, "collection")?;
                let key = require_str(&args, "key")?;
                let from = event_id_from(&args, "from")?;
                let to = event_id_from(&args, "to")?;
                let shard_id = self.server.shards.route(collection, key);
                let diff = self.server.shards.read(shard_id).store.diff(collection, key, from, to)?;
                Ok((
                    json!({
                        "changed": diff.changed,
                        "removed": diff.removed,
                    }),
                    None,
                ))
            }

            CountObjects => {
                let collection = require_str(&args, "collection")?.to_string();
                let predicates = predicate_set_from(&args);
                let mut count = 0usize;
                for shard_id in 0..self.server.shards.count() {
                    count += self.server.shards.read(shard_id).store.find(&collection, &predicates).len();
                }
                Ok((json!(count), None))
            }
            FindObjects => {
                let collection = require_str(&args, "collection")?.to_string();
                let predicates = predicate_set_from(&args);
                let limit = args.get("limit").and_then(Json::as_i64).unwrap_or(-1);
                let mut found: Vec<String> = Vec::new();
                for shard_id in 0..self.server.shards.count() {
                    found.extend(self.server.shards.read(shard_id).store.find(&collection, &predicates));
                }
                found.sort();
                if limit >= 0 {
                    found.truncate(limit as usize);
                }
                Ok((json!(found), None))
            }

            AddToObject => {
                let collection = require_str(&args, "collection")?.to_string();
                let key = require_str(&args, "key")?.to_string();
                let patch = args.get("value").cloned().unwrap_or(Json::Null);
                self.with_transaction(task_id, &args, |tx| tx.add(&collection, &key, patch));
                self.server.triggers.fire(&collection);
                Ok((Json::Null, None))
            }

            ExecuteCode => {
                let runtime = self
                    .server
                    .program_runtime
                    .as_ref()
                    .ok_or_else(|| CredbError::validation("no program runtime configured"))?;
                let source = require_str(&args, "source")?;
                let bytecode = runtime.compile(source.as_bytes())?;
                Ok((json!(BASE64.encode(bytecode)), None))
            }
            CallProgram => {
                let runtime = self
                    .server
                    .program_runtime
                    .as_ref()
                    .ok_or_else(|| CredbError::validation("no program runtime configured"))?;
                let encoded = require_str(&args, "bytecode")?;
                let bytecode = BASE64
                    .decode(encoded)
                    .map_err(|_| CredbError::validation("malformed base64 bytecode"))?;
                let program_args = args.get("args").cloned().unwrap_or(Json::Null);
                let result = runtime.run(&bytecode, &program_args, &self.server.shards)?;
                Ok((result, None))
            }

            OrderEvents => {
                if let (Some(_), Some(_)) = (args.get("witness_a"), args.get("witness_b")) {
                    let a = Witness::from_armor(require_str(&args, "witness_a")?)?;
                    let b = Witness::from_armor(require_str(&args, "witness_b")?)?;
                    Ok((json!(order_result_str(order_witnesses(&a, &b))), None))
                } else {
                    let a = event_id_from(&args, "a")?;
                    let b = event_id_from(&args, "b")?;
                    Ok((json!(order_result_str(order(a, b))), None))
                }
            }

            CommitTransaction => {
                let generate_witness = args.get("generate_witness").and_then(Json::as_bool).unwrap_or(false);
                let mut txn = self
                    .transactions
                    .lock()
                    .remove(&task_id)
                    .ok_or_else(|| CredbError::conflict("no open transaction for this task"))?;
                let reads = txn.read_events();
                match txn.commit(&self.server.shards, &self.server.txn_seq) {
                    Ok(outcome) => {
                        self.server.stats.transaction_committed();
                        let touched: std::collections::HashSet<String> =
                            outcome.writes.iter().map(|w| w.collection.clone()).collect();
                        for collection in &touched {
                            self.server.triggers.fire(collection);
                        }
                        let witness = if generate_witness {
                            let mut events: Vec<WitnessedEvent> = outcome
                                .writes
                                .iter()
                                .map(|w| WitnessedEvent {
                                    shard: w.event_id.shard,
                                    block: w.event_id.block,
                                    index: w.event_id.index,
                                    key: w.key.clone(),
                                    version: w.version,
                                    operation: w.kind.as_str().to_string(),
                                })
                                .collect();
                            events.extend(reads.into_iter().map(|(_, key, id)| WitnessedEvent {
                                shard: id.shard,
                                block: id.block,
                                index: id.index,
                                key,
                                version: 0,
                                operation: "read".to_string(),
                            }));
                            Some(Witness::assemble(&self.server.server_name, events, &self.server.identity).to_armor())
                        } else {
                            None
                        };
                        Ok((json!({"success": true, "event_count": outcome.writes.len()}), witness))
                    }
                    Err(err) => {
                        self.server.stats.transaction_aborted();
                        Err(err)
                    }
                }
            }

            GetStatistics => {
                let snapshot = admin::snapshot(&self.server.shards, &self.server.pager, &self.server.stats);
                Ok((serde_json::to_value(snapshot).expect("statistics serialize"), None))
            }
        }
    }
}

fn order_result_str(result: OrderResult) -> &'static str {
    match result {
        OrderResult::Before => "before",
        OrderResult::After => "after",
        OrderResult::Concurrent => "concurrent",
        OrderResult::Equal => "equal",
        OrderResult::Unknown => "unknown",
    }
}
