//! Session hub
//!
//! Remembers every consumer session by id, routes dispatches to the sessions
//! of a shard tuple, and forgets sessions that overflow or stay away too long.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::session::{Session, SESSION_QUEUE_LIMIT};
use crate::protocol::DispatchFrame;

/// How long a detached session stays resumable
pub const SESSION_TTL: Duration = Duration::from_secs(300);

fn session_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

#[derive(Debug)]
pub struct Hub {
    sessions: DashMap<String, Arc<Session>>,
    queue_limit: usize,
    session_ttl: Duration,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(SESSION_QUEUE_LIMIT, SESSION_TTL)
    }
}

impl Hub {
    pub fn new(queue_limit: usize, session_ttl: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            queue_limit,
            session_ttl,
        }
    }

    /// Open a fresh session for `[shard_id, shard_count]`
    ///
    /// The session is remembered at once but receives routed dispatches
    /// only after [`Session::go_live`].
    pub fn create(&self, shard: [u32; 2]) -> Arc<Session> {
        self.sweep(Instant::now());

        let session = loop {
            let id = session_id();
            if !self.sessions.contains_key(&id) {
                break Arc::new(Session::new(id, shard, self.queue_limit));
            }
        };
        self.sessions
            .insert(session.id().to_string(), Arc::clone(&session));
        session
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.get(session_id).map(|s| Arc::clone(s.value()))
    }

    pub fn forget(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Live sessions subscribed to exactly this shard tuple
    pub fn subscribers(&self, shard: [u32; 2]) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|s| s.shard() == shard && s.is_live())
            .map(|s| Arc::clone(s.value()))
            .collect()
    }

    /// Queue a dispatch for every session of the tuple
    ///
    /// Never waits on a consumer. Sessions whose queue overflows are
    /// forgotten; their connection is closed by its own task.
    pub fn route(&self, shard: [u32; 2], frame: &DispatchFrame<'_>) -> usize {
        let mut delivered = 0;
        for session in self.subscribers(shard) {
            match session.push(frame) {
                Ok(_) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        session_id = %session.id(),
                        shard = ?shard,
                        error = %e,
                        "Dropping consumer session"
                    );
                    self.forget(session.id());
                }
            }
        }
        delivered
    }

    /// Kick the connected consumers of one upstream shard
    ///
    /// Matches the whole `[shard_id, shard_count]` tuple, so consumers that
    /// split the identity differently stay connected.
    pub fn kick_shard(&self, shard: [u32; 2], reason: &str) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.shard() == shard)
            .map(|s| Arc::clone(s.value()))
            .collect::<Vec<_>>()
            .into_iter()
            .filter(|session| session.kick(reason))
            .count()
    }

    /// Forget sessions detached for longer than the TTL
    pub fn sweep(&self, now: Instant) {
        let ttl = self.session_ttl;
        self.sessions.retain(|_, session| !session.is_expired(ttl, now));
    }

    pub fn clear(&self) {
        self.sessions.clear();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::value::RawValue;

    use super::*;
    use crate::connection::Queued;

    fn frame_data() -> Box<RawValue> {
        RawValue::from_string("{}".to_string()).unwrap()
    }

    #[test]
    fn test_create_and_forget() {
        let hub = Hub::default();
        let session = hub.create([0, 2]);
        assert_eq!(session.id().len(), 16);
        assert!(hub.get(session.id()).is_some());

        hub.forget(session.id());
        assert!(hub.get(session.id()).is_none());
        assert!(hub.is_empty());
    }

    #[test]
    fn test_route_by_exact_tuple() {
        let hub = Hub::default();
        let a = hub.create([0, 2]);
        let b = hub.create([1, 2]);
        let c = hub.create([0, 4]);
        let hydrating = hub.create([0, 2]);
        for session in [&a, &b, &c] {
            session.go_live();
        }

        let d = frame_data();
        assert_eq!(hub.route([0, 2], &DispatchFrame::synthetic("MESSAGE_CREATE", &d)), 1);
        assert_eq!(a.len(), 1);
        assert!(b.is_empty());
        assert!(c.is_empty());
        assert!(hydrating.is_empty());
    }

    #[test]
    fn test_overflow_forgets_session() {
        let hub = Hub::new(1, SESSION_TTL);
        let session = hub.create([0, 1]);
        session.go_live();
        let d = frame_data();
        let frame = DispatchFrame::synthetic("MESSAGE_CREATE", &d);

        assert_eq!(hub.route([0, 1], &frame), 1);
        assert_eq!(hub.route([0, 1], &frame), 0);
        assert!(session.is_overflowed());
        assert!(hub.get(session.id()).is_none());
    }

    #[test]
    fn test_kick_shard_hits_connected_sessions_of_tuple() {
        let hub = Hub::default();
        let connected = hub.create([1, 2]);
        connected.attach();
        let away = hub.create([1, 2]);
        let other = hub.create([0, 2]);
        other.attach();
        let resharded = hub.create([1, 4]);
        resharded.attach();

        assert_eq!(hub.kick_shard([1, 2], "reconnecting"), 1);
        assert!(matches!(
            connected.drain().as_slice(),
            [Queued::Kick { .. }]
        ));
        assert!(away.is_empty());
        assert!(other.is_empty());
        assert!(resharded.is_empty());

        assert_eq!(hub.kick_shard([1, 4], "reconnecting"), 1);
        assert!(connected.is_empty());
    }

    #[test]
    fn test_sweep_keeps_connected_sessions() {
        let hub = Hub::new(10, Duration::from_secs(1));
        let connected = hub.create([0, 1]);
        connected.attach();
        hub.create([0, 1]);

        hub.sweep(Instant::now() + Duration::from_secs(5));
        assert_eq!(hub.len(), 1);
        assert!(hub.get(connected.id()).is_some());
    }
}
