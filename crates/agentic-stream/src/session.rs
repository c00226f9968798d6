//! Session identity lifecycle. Pure state, no I/O.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Opaque, URL-safe session token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// 128 bits from the OS random source, rendered as 32 lowercase hex characters.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Terminated,
}

/// What the store knows about an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Terminated,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub state: SessionState,
    last_seen: Instant,
}

impl Session {
    fn new(id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id,
            created_at: now,
            last_seen_at: now,
            state: SessionState::Active,
            last_seen: Instant::now(),
        }
    }

    fn mark_seen(&mut self) {
        self.last_seen_at = Utc::now();
        self.last_seen = Instant::now();
    }

    /// Time since the last touch (or since termination for tombstones).
    pub fn idle_for(&self) -> Duration {
        self.last_seen.elapsed()
    }
}

/// Session bookkeeping used by the transports. Implementations synchronize internally.
pub trait SessionStore: Send + Sync {
    /// Insert a new Active session and return its id.
    fn create(&self) -> SessionId;

    /// Refresh `last_seen_at`. False if the session is unknown or terminated.
    fn touch(&self, id: &SessionId) -> bool;

    /// Terminate an Active session. False if it was already terminated or never existed.
    fn terminate(&self, id: &SessionId) -> bool;

    fn status(&self, id: &SessionId) -> SessionStatus;

    fn is_valid(&self, id: &SessionId) -> bool {
        self.status(id) == SessionStatus::Active
    }

    fn get(&self, id: &SessionId) -> Option<Session>;

    /// Terminate every Active session idle for at least `ttl`; returns the ids terminated.
    fn expire_idle(&self, ttl: Duration) -> Vec<SessionId>;

    /// Forget terminated sessions older than `older_than`. Returns how many were dropped.
    fn prune_terminated(&self, older_than: Duration) -> usize;

    fn active_count(&self) -> usize;
}

/// Default store: one map behind one lock. Terminated sessions stay as tombstones until pruned.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self) -> SessionId {
        let mut sessions = self.sessions.write();
        let mut id = SessionId::generate();
        while sessions.contains_key(&id) {
            id = SessionId::generate();
        }
        sessions.insert(id.clone(), Session::new(id.clone()));
        tracing::info!(session = %id, "Session created");
        id
    }

    fn touch(&self, id: &SessionId) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(id) {
            Some(session) if session.state == SessionState::Active => {
                session.mark_seen();
                true
            }
            _ => false,
        }
    }

    fn terminate(&self, id: &SessionId) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(id) {
            Some(session) if session.state == SessionState::Active => {
                session.state = SessionState::Terminated;
                session.mark_seen();
                tracing::info!(session = %id, "Session terminated");
                true
            }
            _ => false,
        }
    }

    fn status(&self, id: &SessionId) -> SessionStatus {
        match self.sessions.read().get(id).map(|s| s.state) {
            Some(SessionState::Active) => SessionStatus::Active,
            Some(SessionState::Terminated) => SessionStatus::Terminated,
            None => SessionStatus::Unknown,
        }
    }

    fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    fn expire_idle(&self, ttl: Duration) -> Vec<SessionId> {
        let mut sessions = self.sessions.write();
        let mut expired = Vec::new();
        for session in sessions.values_mut() {
            if session.state == SessionState::Active && session.idle_for() >= ttl {
                session.state = SessionState::Terminated;
                session.mark_seen();
                expired.push(session.id.clone());
            }
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Expired idle sessions");
        }
        expired
    }

    fn prune_terminated(&self, older_than: Duration) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, s| s.state == SessionState::Active || s.idle_for() < older_than);
        before - sessions.len()
    }

    fn active_count(&self) -> usize {
        self.sessions
            .read()
            .values()
            .filter(|s| s.state == SessionState::Active)
            .count()
    }
}
