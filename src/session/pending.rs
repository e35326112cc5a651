//! Client-side pending-response bookkeeping (§5, §9).
//!
//! A response can arrive on the connection's read task at any time,
//! independent of which operation the caller is currently blocked on.
//! `PendingResponses` is a `(task_id, op_id) -> oneshot` map the read
//! task completes into and the calling task awaits, generalizing the
//! original implementation's per-operation `PendingGetResponse`,
//! `PendingFindResponse`, etc. into one map keyed by correlation id.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{CredbError, Result};
use crate::session::op::{Correlation, ResponseBody};

/// A registry of outstanding client operations awaiting a response.
#[derive(Default)]
pub struct PendingResponses {
    inner: Mutex<HashMap<Correlation, oneshot::Sender<ResponseBody>>>,
}

impl PendingResponses {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new outstanding operation, returning the receiver
    /// half the caller should await.
    pub fn register(&self, correlation: Correlation) -> oneshot::Receiver<ResponseBody> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(correlation, tx);
        rx
    }

    /// Completes an outstanding operation with its response body. A
    /// response for an unknown or already-completed correlation id is
    /// silently dropped (the caller may have already given up, e.g. on
    /// connection close).
    pub fn complete(&self, correlation: Correlation, body: ResponseBody) {
        if let Some(tx) = self.inner.lock().remove(&correlation) {
            let _ = tx.send(body);
        }
    }

    /// Completes every outstanding operation with a connection-closed
    /// error, waking every caller still waiting (§5 Cancellation).
    pub fn fail_all_closed(&self) {
        let pending: Vec<_> = self.inner.lock().drain().collect();
        for (_, tx) in pending {
            let _ = tx.send(ResponseBody::Err {
                message: "connection closed".to_string(),
            });
        }
    }

    /// Number of operations still outstanding.
    pub fn outstanding_count(&self) -> usize {
        self.inner.lock().len()
    }
}

/// Converts a received response body into a `Result`, the shape most
/// callers actually want.
pub fn into_result(body: ResponseBody) -> Result<serde_json::Value> {
    match body {
        ResponseBody::Ok { value, .. } => Ok(value),
        ResponseBody::Err { message } => Err(CredbError::conflict(message)),
    }
}
