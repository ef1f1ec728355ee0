//! Correlation of forwarded requests with the extension's asynchronous
//! answers.
//!
//! Every forwarded request owns a single-assignment slot keyed by its
//! `request_id`. The id counter and the slot map share one lock so that two
//! TCP handlers can never be handed the same id. The lock is a plain
//! `std::sync::Mutex`: it is never held across an `.await`, and it lets
//! [`PendingHandle`] clean up after itself in `Drop`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;

use tabreader_core::{Error, Message, Result};

struct PendingRequest {
    created_at: Instant,
    slot: oneshot::Sender<Message>,
}

#[derive(Default)]
struct PendingInner {
    /// Highest id handed out so far. Ids start at 1 and are never reused.
    last_id: u64,
    slots: HashMap<u64, PendingRequest>,
}

#[derive(Clone, Default)]
pub struct PendingTable {
    inner: Arc<Mutex<PendingInner>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PendingInner> {
        // Nothing panics while the lock is held, so a poisoned map is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the next id from the counter and open its slot, atomically.
    pub fn allocate(&self) -> PendingHandle {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut inner = self.lock();
            inner.last_id += 1;
            let id = inner.last_id;
            inner.slots.insert(
                id,
                PendingRequest {
                    created_at: Instant::now(),
                    slot: tx,
                },
            );
            id
        };
        self.handle(id, rx)
    }

    /// Open a slot for an explicit id. Fails if `id` already has a live slot.
    pub fn register(&self, id: u64) -> Result<PendingHandle> {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.lock();
            if inner.slots.contains_key(&id) {
                return Err(Error::DuplicateRequest(id));
            }
            inner.last_id = inner.last_id.max(id);
            inner.slots.insert(
                id,
                PendingRequest {
                    created_at: Instant::now(),
                    slot: tx,
                },
            );
        }
        Ok(self.handle(id, rx))
    }

    fn handle(&self, id: u64, rx: oneshot::Receiver<Message>) -> PendingHandle {
        PendingHandle {
            id,
            table: self.clone(),
            rx,
        }
    }

    /// Hand `message` to the waiter for `id`.
    ///
    /// Returns false when there is no live slot (never registered, already
    /// answered, timed out or cancelled) or the waiter has gone away. Such a
    /// message is simply dropped.
    pub fn deliver(&self, id: u64, message: Message) -> bool {
        let pending = self.lock().slots.remove(&id);
        let Some(pending) = pending else {
            debug!(request_id = id, "No pending request for response");
            return false;
        };
        let elapsed_ms = pending.created_at.elapsed().as_millis() as u64;
        if pending.slot.send(message).is_err() {
            debug!(request_id = id, elapsed_ms, "Waiter dropped before delivery");
            return false;
        }
        debug!(request_id = id, elapsed_ms, "Response delivered");
        true
    }

    /// Close the slot for `id`; its waiter wakes with
    /// `Error::ExtensionDisconnected`.
    pub fn cancel(&self, id: u64) -> bool {
        self.lock().slots.remove(&id).is_some()
    }

    /// Close every live slot. Returns how many were closed.
    pub fn fail_all(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut inner = self.lock();
            inner.slots.drain().map(|(_, p)| p).collect()
        };
        drained.len()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.lock().slots.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest id handed out so far (0 before the first request).
    pub fn last_id(&self) -> u64 {
        self.lock().last_id
    }
}

/// The waiting side of one pending request. Dropping it removes the slot.
pub struct PendingHandle {
    id: u64,
    table: PendingTable,
    rx: oneshot::Receiver<Message>,
}

impl PendingHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Suspend until the response arrives or `timeout` elapses. The slot is
    /// gone from the table once this returns, whatever the outcome.
    pub async fn wait(mut self, timeout: Duration) -> Result<Message> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(Error::ExtensionDisconnected),
            Err(_) => Err(Error::Timeout(format!(
                "request {} got no response within {}s",
                self.id,
                timeout.as_secs_f64()
            ))),
        }
    }
}

impl Drop for PendingHandle {
    fn drop(&mut self) {
        self.table.cancel(self.id);
    }
}
