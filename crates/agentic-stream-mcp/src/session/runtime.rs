//! Registry of per-session runtimes, created lazily on first use.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use agentic_stream::{PendingCalls, SessionId};

/// Transport state owned by one session.
#[derive(Default)]
pub struct SessionRuntime {
    /// Server-to-client calls awaiting a reply from this session's client.
    pub pending: Arc<PendingCalls>,
}

/// Maps a session (or `None` in stateless mode) to its runtime.
#[derive(Default)]
pub struct SessionRuntimes {
    runtimes: Mutex<HashMap<Option<SessionId>, Arc<SessionRuntime>>>,
}

impl SessionRuntimes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the runtime for `session`.
    pub fn get_or_create(&self, session: &Option<SessionId>) -> Arc<SessionRuntime> {
        let mut runtimes = self.runtimes.lock();
        if let Some(runtime) = runtimes.get(session) {
            return Arc::clone(runtime);
        }
        let runtime = Arc::new(SessionRuntime::default());
        runtimes.insert(session.clone(), Arc::clone(&runtime));
        runtime
    }

    pub fn get(&self, session: &Option<SessionId>) -> Option<Arc<SessionRuntime>> {
        self.runtimes.lock().get(session).cloned()
    }

    /// Drop a session's runtime, failing any call still waiting on its client.
    pub fn remove(&self, session: &SessionId) -> bool {
        let Some(runtime) = self.runtimes.lock().remove(&Some(session.clone())) else {
            return false;
        };
        let cancelled = runtime.pending.cancel_all();
        if cancelled > 0 {
            tracing::info!(session = %session, cancelled, "Cancelled pending server calls");
        }
        true
    }

    /// Number of live runtimes.
    pub fn count(&self) -> usize {
        self.runtimes.lock().len()
    }
}
