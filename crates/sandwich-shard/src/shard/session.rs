//! Per-shard session bookkeeping
//!
//! Kept free of I/O so the timing rules can be tested with a paused clock.

use std::collections::HashSet;
use std::time::Duration;

use sandwich_core::Snowflake;
use tokio::time::Instant;

/// Idle time after the last GUILD_CREATE before a shard counts as ready
pub const READY_IDLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Heartbeats that may go unacknowledged before the connection is dropped
pub const HEARTBEAT_FAILURE_FACTOR: u32 = 5;

/// Discord session that can be resumed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub session_id: String,
    pub resume_url: Option<String>,
}

impl Session {
    pub fn is_empty(&self) -> bool {
        self.session_id.is_empty()
    }
}

/// Tracks the guilds READY listed as unavailable
///
/// The barrier passes once every listed guild has arrived, or once
/// [`READY_IDLE_TIMEOUT`] passes without a GUILD_CREATE. Guilds still pending
/// after that stay recorded so a late GUILD_CREATE is reported as lazy.
#[derive(Debug, Default)]
pub struct ReadyBarrier {
    pending: HashSet<Snowflake>,
    deadline: Option<Instant>,
    passed: bool,
}

impl ReadyBarrier {
    /// Start over from a READY payload; returns whether the barrier passed
    pub fn on_ready(&mut self, guilds: impl IntoIterator<Item = Snowflake>, now: Instant) -> bool {
        self.pending = guilds.into_iter().collect();
        self.passed = false;
        self.deadline = Some(now + READY_IDLE_TIMEOUT);
        self.check_complete()
    }

    /// RESUMED keeps the pending set and passes at once
    pub fn on_resumed(&mut self) {
        self.pass();
    }

    /// Returns whether the guild was still pending
    pub fn on_guild_create(&mut self, guild_id: Snowflake, now: Instant) -> bool {
        let lazy = self.pending.remove(&guild_id);
        if !self.passed {
            self.deadline = Some(now + READY_IDLE_TIMEOUT);
            self.check_complete();
        }
        lazy
    }

    /// An outage makes the guild pending again
    pub fn on_guild_unavailable(&mut self, guild_id: Snowflake) {
        self.pending.insert(guild_id);
    }

    /// Pass the barrier if the idle deadline is due
    pub fn poll(&mut self, now: Instant) -> bool {
        if !self.passed && self.deadline.is_some_and(|d| now >= d) {
            self.pass();
        }
        self.passed
    }

    /// When the reader should wake up to poll
    pub fn deadline(&self) -> Option<Instant> {
        if self.passed {
            None
        } else {
            self.deadline
        }
    }

    pub fn is_passed(&self) -> bool {
        self.passed
    }

    pub fn pending(&self) -> &HashSet<Snowflake> {
        &self.pending
    }

    /// Wait for the next READY or RESUMED; pending guilds are kept
    pub fn reset(&mut self) {
        self.deadline = None;
        self.passed = false;
    }

    fn check_complete(&mut self) -> bool {
        if self.pending.is_empty() {
            self.pass();
        }
        self.passed
    }

    fn pass(&mut self) {
        self.passed = true;
        self.deadline = None;
    }
}

/// Heartbeat timestamps of the current connection
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatClock {
    pub interval: Duration,
    pub last_sent: Option<Instant>,
    pub last_ack: Instant,
    /// Round trip of the last acknowledged heartbeat
    pub latency: Option<Duration>,
}

impl HeartbeatClock {
    pub fn new(interval: Duration, now: Instant) -> Self {
        Self {
            interval,
            last_sent: None,
            last_ack: now,
            latency: None,
        }
    }

    /// No ack for longer than the failure window
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.last_ack) > self.interval * HEARTBEAT_FAILURE_FACTOR
    }

    pub fn sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }

    pub fn acked(&mut self, now: Instant) {
        self.last_ack = now;
        if let Some(sent) = self.last_sent {
            self.latency = Some(now.saturating_duration_since(sent));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sf(n: u64) -> Snowflake {
        Snowflake::new(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_barrier_passes_when_all_guilds_arrive() {
        let mut barrier = ReadyBarrier::default();
        let now = Instant::now();

        assert!(!barrier.on_ready([sf(1), sf(2)], now));
        assert!(barrier.on_guild_create(sf(1), now));
        assert!(!barrier.is_passed());
        assert!(barrier.on_guild_create(sf(2), now));
        assert!(barrier.is_passed());
        assert!(barrier.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_barrier_idle_timeout() {
        let mut barrier = ReadyBarrier::default();
        let start = Instant::now();

        barrier.on_ready([sf(1), sf(2), sf(3)], start);
        barrier.on_guild_create(sf(1), start + Duration::from_secs(1));
        barrier.on_guild_create(sf(2), start + Duration::from_secs(2));

        // Deadline restarted by the second GUILD_CREATE
        assert!(!barrier.poll(start + Duration::from_secs(6)));
        assert_eq!(
            barrier.deadline(),
            Some(start + Duration::from_secs(2) + READY_IDLE_TIMEOUT)
        );
        assert!(barrier.poll(start + Duration::from_secs(7)));
        assert_eq!(barrier.pending().len(), 1);
        assert!(barrier.pending().contains(&sf(3)));

        // Late arrival is still lazy
        assert!(barrier.on_guild_create(sf(3), start + Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_barrier_without_guilds() {
        let mut barrier = ReadyBarrier::default();
        assert!(barrier.on_ready(std::iter::empty(), Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_barrier_outage() {
        let mut barrier = ReadyBarrier::default();
        let now = Instant::now();
        barrier.on_ready([sf(1)], now);
        barrier.on_guild_create(sf(1), now);

        barrier.on_guild_unavailable(sf(1));
        assert!(barrier.is_passed());
        assert!(barrier.on_guild_create(sf(1), now));
        assert!(!barrier.on_guild_create(sf(1), now));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_window() {
        let start = Instant::now();
        let interval = Duration::from_millis(41_250);
        let mut clock = HeartbeatClock::new(interval, start);

        assert!(!clock.is_expired(start + interval * 5));
        assert!(clock.is_expired(start + interval * 5 + Duration::from_millis(1)));

        clock.sent(start + interval);
        clock.acked(start + interval + Duration::from_millis(40));
        assert_eq!(clock.latency, Some(Duration::from_millis(40)));
        assert!(!clock.is_expired(start + interval * 6));
    }
}
