//! Correlated request table.
//!
//! Every in-flight call owns one entry keyed by its [`RequestId`]. Removing the
//! entry is the linearization point: whichever of response, timeout, delivery
//! failure or shutdown removes it first fires the completion, and every later
//! attempt is a no-op.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

use crate::error::BridgeError;
use crate::types::RequestId;

pub type CallOutcome = Result<Value, BridgeError>;
pub type Completion = oneshot::Receiver<CallOutcome>;

struct PendingCall {
    method: String,
    completion: oneshot::Sender<CallOutcome>,
    timeout_watcher: Option<AbortHandle>,
}

#[derive(Default)]
pub struct RequestTable {
    entries: Mutex<HashMap<RequestId, PendingCall>>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RequestId, PendingCall>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a call and returns the receiving half of its completion.
    pub fn register(&self, id: RequestId, method: &str) -> Completion {
        let (tx, rx) = oneshot::channel();
        let previous = self.entries().insert(
            id.clone(),
            PendingCall {
                method: method.to_string(),
                completion: tx,
                timeout_watcher: None,
            },
        );
        if previous.is_some() {
            tracing::warn!(request_id = %id, method, "Bridge request id reused");
        }
        rx
    }

    /// Pairs a timeout watcher with its entry. If the entry already resolved
    /// the watcher is cancelled on the spot.
    pub fn attach_watcher(&self, id: &RequestId, watcher: AbortHandle) {
        let mut entries = self.entries();
        match entries.get_mut(id) {
            Some(call) => call.timeout_watcher = Some(watcher),
            None => watcher.abort(),
        }
    }

    /// Resolves and removes an entry. Returns `false` when the id is unknown or
    /// was already resolved.
    pub fn resolve(&self, id: &RequestId, outcome: CallOutcome) -> bool {
        let Some(call) = self.entries().remove(id) else {
            return false;
        };
        if let Some(watcher) = call.timeout_watcher {
            watcher.abort();
        }
        if call.completion.send(outcome).is_err() {
            tracing::debug!(request_id = %id, method = %call.method, "Bridge caller went away before resolution");
        }
        true
    }

    /// Fails every in-flight call with `error`, returning how many were pending.
    pub fn fail_all(&self, error: &BridgeError) -> usize {
        let drained: Vec<_> = self.entries().drain().collect();
        let count = drained.len();
        for (_, call) in drained {
            if let Some(watcher) = call.timeout_watcher {
                watcher.abort();
            }
            let _ = call.completion.send(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
