//! Session Store: a concurrent map of `instance_uid -> session`,
//! with a bounded, FIFO-per-kind outbound queue per session and a
//! watch-channel based mechanism for telling a session's owning connection
//! task that it has been closed (superseded, idle, overloaded, or the
//! server is shutting down).

mod error;
mod queue;

pub use error::SessionError;
pub use queue::{EnqueueOutcome, MessageKind, QueuedMessage};

use crate::metrics::Metrics;
use crate::model::{SessionId, Transport};
use flowgate_wire::codec::ServerToAgent;
use flowgate_wire::InstanceUid;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Superseded,
    Idle,
    Overloaded,
    Protocol,
    ServerShuttingDown,
    Explicit,
}

/// What a session's owning connection task learns once the store has closed
/// it: the reason, plus an optional last message (the `UNAVAILABLE` error
/// response on `Overloaded`) that must reach the agent before the transport
/// tears the connection down. Carrying it here, rather than leaving it in
/// the now-removed outbound queue, means the writer task reads it directly
/// off the same signal instead of racing a final drain against the close.
#[derive(Debug, Clone)]
pub struct ClosedState {
    pub reason: CloseReason,
    pub final_message: Option<ServerToAgent>,
}

impl ClosedState {
    fn plain(reason: CloseReason) -> Self {
        Self {
            reason,
            final_message: None,
        }
    }
}

/// Handed to the transport terminator that owns the physical connection for
/// a session. Cloning shares the same closed-signal receiver.
#[derive(Clone)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub instance_uid: InstanceUid,
    pub transport: Transport,
    closed_rx: watch::Receiver<Option<ClosedState>>,
}

impl SessionHandle {
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed_rx.borrow().as_ref().map(|state| state.reason)
    }

    /// Resolves once the session has been closed by the store (superseded,
    /// idle timeout, overload, protocol error, or shutdown).
    pub async fn closed(&mut self) -> ClosedState {
        loop {
            if let Some(state) = self.closed_rx.borrow().clone() {
                return state;
            }
            if self.closed_rx.changed().await.is_err() {
                return ClosedState::plain(CloseReason::Explicit);
            }
        }
    }
}

struct SessionEntry {
    session_id: SessionId,
    transport: Transport,
    established_at: SystemTime,
    last_activity: SystemTime,
    inbound_sequence_num: u64,
    queue: queue::OutboundQueue,
    closed_tx: watch::Sender<Option<ClosedState>>,
}

pub struct SessionStore {
    sessions: Mutex<HashMap<InstanceUid, SessionEntry>>,
    max_queue_depth: usize,
    max_sessions: usize,
    metrics: Metrics,
}

impl SessionStore {
    pub fn new(max_queue_depth: usize, max_sessions: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_queue_depth,
            max_sessions,
            metrics: Metrics::new(),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Opens a session for `instance_uid`. If one already exists it is
    /// superseded first: its owning task is signalled via the watch channel
    /// and its outbound queue is dropped, then the new session replaces it.
    /// A genuinely new session is refused with [`SessionError::Overloaded`]
    /// once `max_sessions` concurrently open sessions are already tracked.
    pub fn open(
        &self,
        instance_uid: InstanceUid,
        transport: Transport,
    ) -> Result<SessionHandle, SessionError> {
        let mut sessions = self.sessions.lock().expect("session store poisoned");

        if !sessions.contains_key(&instance_uid) && sessions.len() >= self.max_sessions {
            self.metrics.record_session_rejected();
            return Err(SessionError::Overloaded);
        }

        if let Some(previous) = sessions.remove(&instance_uid) {
            debug!(%instance_uid, "superseding existing session");
            let _ = previous
                .closed_tx
                .send(Some(ClosedState::plain(CloseReason::Superseded)));
            self.metrics.record_session_superseded();
        }

        let (closed_tx, closed_rx) = watch::channel(None);
        let session_id = SessionId::new();
        let now = SystemTime::now();
        sessions.insert(
            instance_uid,
            SessionEntry {
                session_id,
                transport,
                established_at: now,
                last_activity: now,
                inbound_sequence_num: 0,
                queue: queue::OutboundQueue::new(self.max_queue_depth),
                closed_tx,
            },
        );

        self.metrics.record_session_opened();
        info!(%instance_uid, session = %session_id, "session opened");
        Ok(SessionHandle {
            session_id,
            instance_uid,
            transport,
            closed_rx,
        })
    }

    /// Idempotent: closing an already-closed (or already-superseded)
    /// session is a no-op.
    pub fn close(&self, session_id: SessionId, reason: CloseReason) {
        let mut sessions = self.sessions.lock().expect("session store poisoned");
        let target = sessions
            .iter()
            .find(|(_, entry)| entry.session_id == session_id)
            .map(|(uid, _)| *uid);

        if let Some(uid) = target {
            if let Some(entry) = sessions.remove(&uid) {
                let _ = entry.closed_tx.send(Some(ClosedState::plain(reason)));
                self.metrics.record_session_closed();
            }
        }
    }

    /// Same as [`Self::close`] but keyed by `instance_uid`, for callers
    /// (the reconciliation loop) that never learned the session id.
    pub fn close_by_instance_uid(&self, instance_uid: &InstanceUid, reason: CloseReason) {
        let mut sessions = self.sessions.lock().expect("session store poisoned");
        if let Some(entry) = sessions.remove(instance_uid) {
            let _ = entry.closed_tx.send(Some(ClosedState::plain(reason)));
            self.metrics.record_session_closed();
        }
    }

    /// Same as [`Self::close_by_instance_uid`], but delivers `final_message`
    /// to the owning connection task before it tears the transport down —
    /// used to land the `UNAVAILABLE` error response on an overloaded
    /// outbound queue.
    pub fn close_by_instance_uid_with_message(
        &self,
        instance_uid: &InstanceUid,
        reason: CloseReason,
        final_message: ServerToAgent,
    ) {
        let mut sessions = self.sessions.lock().expect("session store poisoned");
        if let Some(entry) = sessions.remove(instance_uid) {
            let _ = entry.closed_tx.send(Some(ClosedState {
                reason,
                final_message: Some(final_message),
            }));
            self.metrics.record_session_closed();
        }
    }

    pub fn record_inbound_sequence(&self, instance_uid: &InstanceUid, sequence_num: u64) {
        if let Some(entry) = self
            .sessions
            .lock()
            .expect("session store poisoned")
            .get_mut(instance_uid)
        {
            entry.inbound_sequence_num = sequence_num;
            entry.last_activity = SystemTime::now();
        }
    }

    /// Enqueues `payload` for delivery to `instance_uid`. Never blocks: on a
    /// full queue it either supersedes an older same-kind message or, for a
    /// `NonSupersedable` kind, reports `Rejected` so the caller can decide
    /// to close the session with `Overloaded`.
    pub fn send(
        &self,
        instance_uid: &InstanceUid,
        message: QueuedMessage,
    ) -> Result<EnqueueOutcome, SessionError> {
        let mut sessions = self.sessions.lock().expect("session store poisoned");
        let entry = sessions
            .get_mut(instance_uid)
            .ok_or(SessionError::NotFound)?;
        let outcome = entry.queue.push(message);
        match outcome {
            EnqueueOutcome::Enqueued => self.metrics.record_outbound_enqueued(),
            EnqueueOutcome::SupersededOldest => self.metrics.record_outbound_superseded(),
            EnqueueOutcome::Rejected => self.metrics.record_outbound_rejected(),
        }
        Ok(outcome)
    }

    pub fn drain_outbound(&self, instance_uid: &InstanceUid, limit: usize) -> Vec<QueuedMessage> {
        self.sessions
            .lock()
            .expect("session store poisoned")
            .get_mut(instance_uid)
            .map(|entry| entry.queue.drain_up_to(limit))
            .unwrap_or_default()
    }

    pub fn has_pending_outbound(&self, instance_uid: &InstanceUid) -> bool {
        self.sessions
            .lock()
            .expect("session store poisoned")
            .get(instance_uid)
            .map(|entry| !entry.queue.is_empty())
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> Vec<(InstanceUid, Transport, SystemTime)> {
        self.sessions
            .lock()
            .expect("session store poisoned")
            .iter()
            .map(|(uid, entry)| (*uid, entry.transport, entry.established_at))
            .collect()
    }

    /// Graceful shutdown: signal every session then drop them.
    pub fn close_all(&self, reason: CloseReason) {
        let mut sessions = self.sessions.lock().expect("session store poisoned");
        for (_, entry) in sessions.drain() {
            let _ = entry.closed_tx.send(Some(ClosedState::plain(reason)));
            self.metrics.record_session_closed();
        }
    }

    /// Closes every session whose last inbound activity is older than
    /// `idle_timeout` as of `now`. Returns how many were closed.
    pub fn close_idle_sessions(&self, now: SystemTime, idle_timeout: Duration) -> usize {
        let mut sessions = self.sessions.lock().expect("session store poisoned");
        let idle: Vec<InstanceUid> = sessions
            .iter()
            .filter(|(_, entry)| {
                now.duration_since(entry.last_activity)
                    .unwrap_or_default()
                    >= idle_timeout
            })
            .map(|(uid, _)| *uid)
            .collect();

        for instance_uid in &idle {
            if let Some(entry) = sessions.remove(instance_uid) {
                let _ = entry
                    .closed_tx
                    .send(Some(ClosedState::plain(CloseReason::Idle)));
                self.metrics.record_session_closed();
            }
        }
        idle.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uid(byte: u8) -> InstanceUid {
        InstanceUid::from_bytes(&[byte; 16]).unwrap()
    }

    #[test]
    fn second_open_supersedes_the_first() {
        let store = SessionStore::new(8, 10);
        let first = store.open(uid(1), Transport::Stream).unwrap();
        let second = store.open(uid(1), Transport::Stream).unwrap();

        assert_eq!(first.close_reason(), Some(CloseReason::Superseded));
        assert_eq!(second.close_reason(), None);
        assert_eq!(store.snapshot().len(), 1);
    }

    #[test]
    fn close_is_idempotent() {
        let store = SessionStore::new(8, 10);
        let handle = store.open(uid(2), Transport::Poll).unwrap();
        store.close(handle.session_id, CloseReason::Idle);
        store.close(handle.session_id, CloseReason::Idle);
        assert!(store.snapshot().is_empty());
    }

    #[test]
    fn send_to_unknown_session_errors() {
        let store = SessionStore::new(8, 10);
        let err = store
            .send(
                &uid(3),
                QueuedMessage {
                    kind: MessageKind::ServerCapabilities,
                    payload: sample_payload(),
                },
            )
            .unwrap_err();
        assert_eq!(err, SessionError::NotFound);
    }

    #[test]
    fn open_beyond_max_sessions_is_rejected() {
        let store = SessionStore::new(8, 1);
        let _first = store.open(uid(1), Transport::Stream).unwrap();
        let err = store.open(uid(2), Transport::Stream).unwrap_err();
        assert_eq!(err, SessionError::Overloaded);
    }

    #[test]
    fn reconnect_is_not_counted_as_a_new_session_against_the_cap() {
        let store = SessionStore::new(8, 1);
        let _first = store.open(uid(1), Transport::Stream).unwrap();
        let second = store.open(uid(1), Transport::Stream);
        assert!(second.is_ok());
    }

    #[test]
    fn close_idle_sessions_closes_only_past_the_timeout() {
        let store = SessionStore::new(8, 10);
        let handle = store.open(uid(4), Transport::Poll).unwrap();
        let now = SystemTime::now();

        let closed = store.close_idle_sessions(now, Duration::from_secs(300));
        assert_eq!(closed, 0);
        assert_eq!(handle.close_reason(), None);

        let later = now + Duration::from_secs(301);
        let closed = store.close_idle_sessions(later, Duration::from_secs(300));
        assert_eq!(closed, 1);
        assert_eq!(handle.close_reason(), Some(CloseReason::Idle));
    }

    fn sample_payload() -> flowgate_wire::codec::ServerToAgent {
        flowgate_wire::codec::ServerToAgent {
            instance_uid: uid(0),
            capabilities: 0,
            remote_config: None,
            error_response: None,
            command: None,
            flags: 0,
        }
    }
}
