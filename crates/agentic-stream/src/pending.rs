//! Correlates server-initiated requests with the replies that eventually arrive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::message::{Message, RequestId};

/// Ways a pending call can end without a reply.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum PendingError {
    #[error("No reply within {0:?}")]
    Timeout(Duration),

    #[error("Pending call cancelled")]
    Cancelled,

    #[error("A call with id {0} is already pending")]
    DuplicateId(RequestId),
}

type Slot = oneshot::Sender<Result<Message, PendingError>>;

struct Entry {
    seq: u64,
    created_at: Instant,
    tx: Slot,
}

/// Awaitable handle returned by [`PendingCalls::register`].
#[derive(Debug)]
pub struct PendingCall {
    id: RequestId,
    created_at: Instant,
    rx: oneshot::Receiver<Result<Message, PendingError>>,
}

impl PendingCall {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Wait for the reply, a timeout, or cancellation.
    pub async fn wait(self) -> Result<Message, PendingError> {
        self.rx.await.unwrap_or(Err(PendingError::Cancelled))
    }
}

/// Table of calls awaiting a reply.
#[derive(Default)]
pub struct PendingCalls {
    entries: Mutex<HashMap<RequestId, Entry>>,
    seq: AtomicU64,
    next_id: AtomicI64,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh id for an outgoing server request.
    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn register(&self, id: RequestId) -> Result<PendingCall, PendingError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(PendingError::DuplicateId(id));
        }
        let (tx, rx) = oneshot::channel();
        let created_at = Instant::now();
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        entries.insert(id.clone(), Entry { seq, created_at, tx });
        Ok(PendingCall { id, created_at, rx })
    }

    /// Register and arm a timeout in one step.
    pub fn register_with_timeout(
        self: &Arc<Self>,
        id: RequestId,
        after: Duration,
    ) -> Result<PendingCall, PendingError> {
        let call = self.register(id.clone())?;
        self.timeout(id, after);
        Ok(call)
    }

    /// Deliver a reply. False when nothing is waiting for `id`, which is an expected race.
    pub fn resolve(&self, id: &RequestId, reply: Message) -> bool {
        let Some(entry) = self.entries.lock().remove(id) else {
            tracing::debug!(id = %id, "Reply for unknown or already resolved call");
            return false;
        };
        tracing::debug!(id = %id, elapsed_ms = entry.created_at.elapsed().as_millis() as u64, "Call resolved");
        entry.tx.send(Ok(reply)).is_ok()
    }

    /// Fail the call with [`PendingError::Timeout`] if it is still unresolved after `after`.
    pub fn timeout(self: &Arc<Self>, id: RequestId, after: Duration) {
        let Some(seq) = self.entries.lock().get(&id).map(|e| e.seq) else {
            return;
        };
        let table = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let Some(table) = table.upgrade() else {
                return;
            };
            let entry = {
                let mut entries = table.entries.lock();
                match entries.get(&id) {
                    Some(e) if e.seq == seq => entries.remove(&id),
                    _ => None,
                }
            };
            if let Some(entry) = entry {
                tracing::warn!(id = %id, "Pending call timed out");
                let _ = entry.tx.send(Err(PendingError::Timeout(after)));
            }
        });
    }

    /// Drop a call without replying; its waiter sees [`PendingError::Cancelled`].
    pub fn forget(&self, id: &RequestId) -> bool {
        self.entries.lock().remove(id).is_some()
    }

    /// Fail every outstanding call with [`PendingError::Cancelled`].
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Entry> = self.entries.lock().drain().map(|(_, e)| e).collect();
        let count = drained.len();
        for entry in drained {
            let _ = entry.tx.send(Err(PendingError::Cancelled));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
