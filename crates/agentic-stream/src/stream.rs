//! Stream registry: bounded per-stream replay buffers with live delivery.
//!
//! Every stream owns a ring buffer of the most recent events. Publishing never blocks: a
//! full buffer drops its oldest event. A consumer pulls events in id order with
//! [`StreamConsumer::next`], waiting when it has caught up. Attaching a new consumer to a
//! stream supersedes the previous one, which then ends cleanly.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::message::Message;
use crate::session::SessionId;
use crate::types::{
    EventCursor, EventId, StoredEvent, StreamError, StreamHandle, StreamId, StreamResult,
};

/// Events kept per stream when no capacity is configured.
pub const DEFAULT_BUFFER_CAPACITY: usize = 256;

struct StreamInner {
    last_event_id: EventId,
    /// Highest id handed to any consumer. Fresh attachments start after it.
    delivered: EventId,
    buffer: VecDeque<StoredEvent>,
    open: bool,
    generation: u64,
    /// Whether the consumer of the current generation is still alive.
    attached: bool,
    closed_at: Option<Instant>,
}

struct StreamSlot {
    handle: StreamHandle,
    capacity: usize,
    inner: Mutex<StreamInner>,
    notify: Notify,
}

impl StreamSlot {
    fn new(handle: StreamHandle, capacity: usize) -> Self {
        Self {
            handle,
            capacity,
            inner: Mutex::new(StreamInner {
                last_event_id: 0,
                delivered: 0,
                buffer: VecDeque::with_capacity(capacity.min(DEFAULT_BUFFER_CAPACITY)),
                open: true,
                generation: 0,
                attached: false,
                closed_at: None,
            }),
            notify: Notify::new(),
        }
    }

    fn consumer(self: &Arc<Self>, cursor: EventId) -> StreamConsumer {
        let generation = {
            let mut inner = self.inner.lock();
            inner.generation += 1;
            inner.attached = true;
            inner.generation
        };
        // Wake a superseded consumer so it can observe the new generation.
        self.notify.notify_waiters();
        StreamConsumer {
            slot: self.clone(),
            cursor,
            generation,
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    streams: HashMap<StreamId, Arc<StreamSlot>>,
    standalone: HashMap<Option<SessionId>, StreamId>,
}

/// Owns every open stream. All methods synchronize internally.
pub struct StreamRegistry {
    capacity: usize,
    inner: Mutex<RegistryInner>,
}

impl Default for StreamRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }
}

impl StreamRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(RegistryInner::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Open a request-scoped stream.
    pub fn open_stream(&self, session: Option<SessionId>) -> StreamHandle {
        self.insert(session, false)
    }

    /// The session's standalone stream, created on first use or after the previous one closed.
    pub fn standalone(&self, session: Option<SessionId>) -> StreamHandle {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner
            .standalone
            .get(&session)
            .and_then(|id| inner.streams.get(id))
        {
            if slot.inner.lock().open {
                return slot.handle.clone();
            }
        }

        let handle = StreamHandle {
            id: StreamId::generate(),
            session: session.clone(),
            standalone: true,
        };
        let slot = Arc::new(StreamSlot::new(handle.clone(), self.capacity));
        inner.streams.insert(handle.id.clone(), slot);
        inner.standalone.insert(session, handle.id.clone());
        tracing::info!(stream = %handle.id, "Standalone stream opened");
        handle
    }

    /// The session's standalone stream if one is open; never creates.
    pub fn find_standalone(&self, session: &Option<SessionId>) -> Option<StreamHandle> {
        let inner = self.inner.lock();
        let slot = inner.standalone.get(session).and_then(|id| inner.streams.get(id))?;
        let open = slot.inner.lock().open;
        open.then(|| slot.handle.clone())
    }

    pub fn find(&self, id: &StreamId) -> Option<StreamHandle> {
        self.slot(id).ok().map(|slot| slot.handle.clone())
    }

    /// Append an event and wake the attached consumer. Evicts the oldest event when full.
    pub fn publish(&self, id: &StreamId, payload: Message) -> StreamResult<EventId> {
        let slot = self.slot(id)?;
        let event_id = {
            let mut inner = slot.inner.lock();
            if !inner.open {
                return Err(StreamError::Closed(id.clone()));
            }
            inner.last_event_id += 1;
            let event_id = inner.last_event_id;
            if inner.buffer.len() >= slot.capacity {
                if let Some(evicted) = inner.buffer.pop_front() {
                    tracing::debug!(stream = %id, event = evicted.id, "Evicted buffered event");
                }
            }
            inner.buffer.push_back(StoredEvent {
                id: event_id,
                payload,
            });
            event_id
        };
        slot.notify.notify_waiters();
        tracing::debug!(stream = %id, event = event_id, "Published event");
        Ok(event_id)
    }

    /// Attach a fresh consumer that starts after the last event already delivered.
    pub fn attach(&self, id: &StreamId) -> StreamResult<StreamConsumer> {
        let slot = self.slot(id)?;
        let cursor = slot.inner.lock().delivered;
        Ok(slot.consumer(cursor))
    }

    /// Attach a consumer that replays every event strictly after `after`, then continues live.
    ///
    /// Fails with [`StreamError::ReplayGap`] when some of those events were already evicted.
    pub fn reconnect(&self, id: &StreamId, after: EventId) -> StreamResult<StreamConsumer> {
        let slot = self.slot(id)?;
        {
            let inner = slot.inner.lock();
            if after > inner.last_event_id {
                return Err(StreamError::InvalidCursor(format!(
                    "{after} is beyond the last event {}",
                    inner.last_event_id
                )));
            }
            let oldest = inner
                .buffer
                .front()
                .map(|e| e.id)
                .unwrap_or(inner.last_event_id + 1);
            if after + 1 < oldest {
                tracing::warn!(stream = %id, requested = after, oldest, "Replay gap on reconnect");
                return Err(StreamError::ReplayGap {
                    requested: after,
                    oldest,
                });
            }
        }
        Ok(slot.consumer(after))
    }

    /// Attach a consumer positioned after `after` without checking for evicted events.
    ///
    /// A gap is then reported by the consumer itself as its first item, so the caller never
    /// needs a second lookup that could race with further evictions.
    pub fn resume(&self, id: &StreamId, after: EventId) -> StreamResult<StreamConsumer> {
        let slot = self.slot(id)?;
        {
            let inner = slot.inner.lock();
            if after > inner.last_event_id {
                return Err(StreamError::InvalidCursor(format!(
                    "{after} is beyond the last event {}",
                    inner.last_event_id
                )));
            }
        }
        Ok(slot.consumer(after))
    }

    /// Locate the stream a `Last-Event-ID` refers to, checking it belongs to `session`.
    pub fn resolve(&self, session: &Option<SessionId>, cursor: &EventCursor) -> StreamResult<StreamHandle> {
        match &cursor.stream {
            Some(id) => {
                let slot = self.slot(id)?;
                if &slot.handle.session != session {
                    return Err(StreamError::UnknownStream(id.clone()));
                }
                Ok(slot.handle.clone())
            }
            None => {
                let inner = self.inner.lock();
                let id = inner
                    .standalone
                    .get(session)
                    .ok_or_else(|| StreamError::InvalidCursor(cursor.to_string()))?;
                inner
                    .streams
                    .get(id)
                    .map(|slot| slot.handle.clone())
                    .ok_or_else(|| StreamError::UnknownStream(id.clone()))
            }
        }
    }

    /// Mark a stream closed. Consumers drain what is buffered, then end.
    pub fn close(&self, id: &StreamId) -> bool {
        let Ok(slot) = self.slot(id) else {
            return false;
        };
        let was_open = {
            let mut inner = slot.inner.lock();
            let was_open = inner.open;
            inner.open = false;
            inner.closed_at.get_or_insert_with(Instant::now);
            was_open
        };
        slot.notify.notify_waiters();
        if was_open {
            tracing::debug!(stream = %id, "Stream closed");
        }
        was_open
    }

    /// Close and forget every stream of a session. Returns how many were removed.
    pub fn close_session(&self, session: &SessionId) -> usize {
        let removed: Vec<Arc<StreamSlot>> = {
            let mut inner = self.inner.lock();
            let key = Some(session.clone());
            inner.standalone.remove(&key);
            let ids: Vec<StreamId> = inner
                .streams
                .iter()
                .filter(|(_, slot)| slot.handle.session.as_ref() == Some(session))
                .map(|(id, _)| id.clone())
                .collect();
            ids.iter().filter_map(|id| inner.streams.remove(id)).collect()
        };
        for slot in &removed {
            slot.inner.lock().open = false;
            slot.notify.notify_waiters();
        }
        removed.len()
    }

    /// Close every open stream so attached consumers drain and end. Used on shutdown.
    pub fn close_all(&self) -> usize {
        let ids: Vec<StreamId> = self.inner.lock().streams.keys().cloned().collect();
        ids.iter().filter(|id| self.close(id)).count()
    }

    /// Drop streams that have been closed for at least `older_than`.
    pub fn prune_closed(&self, older_than: Duration) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.streams.len();
        inner.streams.retain(|_, slot| {
            slot.inner
                .lock()
                .closed_at
                .map_or(true, |at| at.elapsed() < older_than)
        });
        let RegistryInner {
            streams,
            standalone,
        } = &mut *inner;
        standalone.retain(|_, id| streams.contains_key(id));
        before - streams.len()
    }

    /// Sessions with a live consumer on one of their open streams.
    pub fn attached_sessions(&self) -> Vec<SessionId> {
        let mut sessions: Vec<SessionId> = self
            .inner
            .lock()
            .streams
            .values()
            .filter(|slot| {
                let inner = slot.inner.lock();
                inner.open && inner.attached
            })
            .filter_map(|slot| slot.handle.session.clone())
            .collect();
        sessions.sort();
        sessions.dedup();
        sessions
    }

    /// Number of open streams.
    pub fn stream_count(&self) -> usize {
        self.inner
            .lock()
            .streams
            .values()
            .filter(|slot| slot.inner.lock().open)
            .count()
    }

    pub fn last_event_id(&self, id: &StreamId) -> Option<EventId> {
        self.slot(id).ok().map(|slot| slot.inner.lock().last_event_id)
    }

    /// Ids currently held in the replay buffer, oldest first.
    pub fn buffered_ids(&self, id: &StreamId) -> Vec<EventId> {
        self.slot(id)
            .map(|slot| slot.inner.lock().buffer.iter().map(|e| e.id).collect())
            .unwrap_or_default()
    }

    fn insert(&self, session: Option<SessionId>, standalone: bool) -> StreamHandle {
        let handle = StreamHandle {
            id: StreamId::generate(),
            session,
            standalone,
        };
        let slot = Arc::new(StreamSlot::new(handle.clone(), self.capacity));
        self.inner.lock().streams.insert(handle.id.clone(), slot);
        tracing::debug!(stream = %handle.id, "Stream opened");
        handle
    }

    fn slot(&self, id: &StreamId) -> StreamResult<Arc<StreamSlot>> {
        self.inner
            .lock()
            .streams
            .get(id)
            .cloned()
            .ok_or_else(|| StreamError::UnknownStream(id.clone()))
    }
}

/// The receiving end of one connection to a stream.
pub struct StreamConsumer {
    slot: Arc<StreamSlot>,
    cursor: EventId,
    generation: u64,
}

impl StreamConsumer {
    pub fn handle(&self) -> &StreamHandle {
        &self.slot.handle
    }

    /// Id of the last event this consumer yielded (or its starting cursor).
    pub fn cursor(&self) -> EventId {
        self.cursor
    }

    /// Next event in id order.
    ///
    /// Returns `None` once the stream is closed and drained, or when a newer consumer has
    /// been attached. Yields `Err(ReplayGap)` once if events were evicted before this
    /// consumer read them, then continues from the oldest retained event.
    pub async fn next(&mut self) -> Option<StreamResult<StoredEvent>> {
        let slot = self.slot.clone();
        loop {
            let notified = slot.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = slot.inner.lock();
                if inner.generation != self.generation {
                    return None;
                }
                if let Some(oldest) = inner.buffer.front().map(|e| e.id) {
                    if self.cursor + 1 < oldest {
                        let requested = self.cursor;
                        self.cursor = oldest - 1;
                        tracing::warn!(stream = %slot.handle.id, requested, oldest, "Consumer fell behind the replay buffer");
                        return Some(Err(StreamError::ReplayGap { requested, oldest }));
                    }
                    let index = (self.cursor + 1 - oldest) as usize;
                    if let Some(event) = inner.buffer.get(index).cloned() {
                        self.cursor = event.id;
                        inner.delivered = inner.delivered.max(event.id);
                        return Some(Ok(event));
                    }
                }
                if !inner.open {
                    return None;
                }
            }

            notified.await;
        }
    }
}

impl Drop for StreamConsumer {
    fn drop(&mut self) {
        let mut inner = self.slot.inner.lock();
        if inner.generation == self.generation {
            inner.attached = false;
        }
    }
}
