//! Periodic cleanup: idle session expiry, tombstone and closed-stream pruning.

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::http::AppState;

/// What one sweep removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_sessions: usize,
    pub pruned_sessions: usize,
    pub pruned_streams: usize,
}

/// Run one cleanup pass now.
pub fn sweep(state: &AppState) -> SweepReport {
    let config = &state.config;

    // A client holding a live stream is active even if it sends no requests.
    for session in state.streams.attached_sessions() {
        state.sessions.touch(&session);
    }

    let expired = state.sessions.expire_idle(config.session_ttl);
    for session in &expired {
        state.end_session(session);
    }

    let report = SweepReport {
        expired_sessions: expired.len(),
        pruned_sessions: state.sessions.prune_terminated(config.session_ttl),
        pruned_streams: state.streams.prune_closed(config.closed_stream_retention),
    };

    if report != SweepReport::default() {
        tracing::info!(
            expired = report.expired_sessions,
            pruned_sessions = report.pruned_sessions,
            pruned_streams = report.pruned_streams,
            "Maintenance sweep"
        );
    }
    report
}

/// Sweep every `maintenance_interval` until `shutdown` fires.
pub fn spawn_maintenance(state: AppState, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(state.config.maintenance_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    sweep(&state);
                }
            }
        }
        tracing::debug!("Maintenance task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use agentic_stream::{PendingError, RequestId};

    use crate::config::ServerConfig;
    use crate::protocol::Dispatcher;
    use crate::transport::HttpTransport;

    fn state(ttl: Duration) -> AppState {
        let config = ServerConfig {
            session_ttl: ttl,
            closed_stream_retention: Duration::ZERO,
            ..Default::default()
        };
        HttpTransport::new(config, Dispatcher::new()).state().clone()
    }

    #[tokio::test]
    async fn test_sweep_expires_idle_sessions() {
        let state = state(Duration::from_millis(10));
        let session = state.sessions.create();
        let stream = state.streams.standalone(Some(session.clone()));
        let runtime = state.runtimes.get_or_create(&Some(session.clone()));
        let call = runtime.pending.register(RequestId::Number(1)).unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let report = sweep(&state);

        assert_eq!(report.expired_sessions, 1);
        assert!(!state.sessions.is_valid(&session));
        assert!(state.streams.find(&stream.id).is_none());
        assert_eq!(call.wait().await.unwrap_err(), PendingError::Cancelled);
    }

    #[tokio::test]
    async fn test_attached_stream_keeps_session_alive() {
        let state = state(Duration::from_millis(10));
        let session = state.sessions.create();
        let stream = state.streams.standalone(Some(session.clone()));
        let consumer = state.streams.attach(&stream.id).unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sweep(&state).expired_sessions, 0);
        assert!(state.sessions.is_valid(&session));

        drop(consumer);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(sweep(&state).expired_sessions, 1);
        assert!(!state.sessions.is_valid(&session));
    }

    #[tokio::test]
    async fn test_sweep_prunes_closed_streams() {
        let state = state(Duration::from_secs(60));
        let handle = state.streams.open_stream(None);
        state.streams.close(&handle.id);
        assert_eq!(sweep(&state).pruned_streams, 1);
        assert!(state.streams.find(&handle.id).is_none());
    }
}
