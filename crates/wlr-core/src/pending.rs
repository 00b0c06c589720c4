//! Correlation table for in-flight requests.
//!
//! Each entry owns a single-shot resolver; removing the entry from the
//! table is what grants the right to complete it, so an id resolves at
//! most once no matter how many responses or cancellations race for it.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::errors::{PendingError, SignerError};

/// What a waiting caller eventually receives.
pub type PendingOutcome = Result<Value, SignerError>;

/// One outstanding request.
#[derive(Debug)]
pub struct PendingEntry {
    pub method: String,
    /// Kept so the receive path can apply method-specific side effects.
    pub params: Value,
    resolver: oneshot::Sender<PendingOutcome>,
}

impl PendingEntry {
    /// Complete the waiting caller. Returns `false` if it stopped waiting.
    pub fn complete(self, outcome: PendingOutcome) -> bool {
        self.resolver.send(outcome).is_ok()
    }
}

#[derive(Debug, Default)]
pub struct PendingRequestTable {
    entries: Mutex<HashMap<String, PendingEntry>>,
}

impl PendingRequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry before the request goes on the wire.
    pub fn register(
        &self,
        id: &str,
        method: &str,
        params: Value,
    ) -> Result<oneshot::Receiver<PendingOutcome>, PendingError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(id) {
            return Err(PendingError::DuplicateId(id.to_string()));
        }
        let (resolver, rx) = oneshot::channel();
        entries.insert(
            id.to_string(),
            PendingEntry {
                method: method.to_string(),
                params,
                resolver,
            },
        );
        Ok(rx)
    }

    /// Remove and return the entry so the caller can finish it.
    pub fn take(&self, id: &str) -> Option<PendingEntry> {
        self.entries.lock().remove(id)
    }

    /// Resolve by id. Unknown ids are dropped.
    pub fn resolve(&self, id: &str, outcome: PendingOutcome) -> bool {
        match self.take(id) {
            Some(entry) => {
                entry.complete(outcome);
                true
            }
            None => {
                tracing::debug!(request_id = %id, "no pending request for id");
                false
            }
        }
    }

    /// Fail one request locally. The counterpart is not told.
    pub fn cancel(&self, id: &str) -> bool {
        self.resolve(id, Err(SignerError::Cancelled))
    }

    /// Fail every outstanding request with `reason`.
    pub fn cancel_all(&self, reason: SignerError) -> usize {
        let drained: Vec<(String, PendingEntry)> = self.entries.lock().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            tracing::debug!(request_id = %id, method = %entry.method, "cancelling pending request");
            entry.complete(Err(reason.clone()));
        }
        count
    }

    /// Resolve every entry for `method` with the same value.
    pub fn resolve_method(&self, method: &str, value: Value) -> usize {
        let matched: Vec<PendingEntry> = {
            let mut entries = self.entries.lock();
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.method == method)
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };
        let count = matched.len();
        for entry in matched {
            entry.complete(Ok(value.clone()));
        }
        count
    }

    pub fn method_of(&self, id: &str) -> Option<String> {
        self.entries.lock().get(id).map(|e| e.method.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
