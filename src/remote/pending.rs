//! Requests waiting for their response.
//!
//! Each outbound request gets an entry keyed by its [`RequestId`]. An entry is
//! removed exactly once: by the matching response, by the caller giving up
//! (timeout or cancellation), or by the sweep when the connection goes away.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use serde_json::Value;
use tokio::sync::oneshot;

use crate::{
    error::{Error, Result},
    protocol::RequestId,
};

/// Receives the outcome of one request.
pub type Slot = oneshot::Receiver<Result<Value>>;

#[derive(Debug)]
struct Entry {
    endpoint: String,
    sent: Instant,
    slot: oneshot::Sender<Result<Value>>,
}

#[derive(Debug, Default)]
pub struct Pending {
    entries: Mutex<HashMap<RequestId, Entry>>,
}

impl Pending {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<RequestId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a request to `endpoint` under a fresh id.
    ///
    /// An id that collides with a live entry is regenerated, so the returned
    /// id is unique among the requests in flight.
    pub fn register(&self, endpoint: &str) -> (RequestId, Slot) {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.entries();

        let mut id = RequestId::fast_v4();
        while entries.contains_key(&id) {
            warn!("request id {id} collides with a pending request, regenerating");
            id = RequestId::fast_v4();
        }

        entries.insert(
            id.clone(),
            Entry {
                endpoint: endpoint.to_owned(),
                sent: Instant::now(),
                slot: tx,
            },
        );
        (id, rx)
    }

    /// Hands `data` to the caller waiting on `id`.
    ///
    /// Returns `false` if no such request is pending, e.g. because it timed
    /// out already.
    pub fn resolve(&self, id: &RequestId, data: Value) -> bool {
        let Some(entry) = self.entries().remove(id) else {
            return false;
        };

        debug!(
            "request {id} to {} answered after {:?}",
            entry.endpoint,
            entry.sent.elapsed()
        );

        // The caller may have stopped waiting in the meantime.
        if entry.slot.send(Ok(data)).is_err() {
            trace!("request {id}: caller went away");
        }
        true
    }

    /// Removes the entry of `id` without resolving it.
    pub fn remove(&self, id: &RequestId) -> bool {
        self.entries().remove(id).is_some()
    }

    /// Fails every pending request with an error from `error` and returns how
    /// many there were.
    pub fn fail_all(&self, error: impl Fn() -> Error) -> usize {
        let entries: Vec<_> = self.entries().drain().collect();
        let count = entries.len();

        for (id, entry) in entries {
            trace!("request {id} to {}: failing", entry.endpoint);
            let _ = entry.slot.send(Err(error()));
        }
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
