//! Outbound command rate limiting
//!
//! Discord allows 120 gateway commands per 60 s. Non-heartbeat commands go
//! through this limiter, which admits at most 118 in any 60 s window so
//! heartbeats always have room.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Commands that may be sent back to back
const BURST: NonZeroU32 = NonZeroU32::MIN.saturating_add(58);

/// Replenish interval; burst plus one cell per period stays below 118 a minute
const REPLENISH: Duration = Duration::from_millis(1017);

type DirectLimiter<C> = RateLimiter<NotKeyed, InMemoryState, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Per-shard limiter for outbound gateway commands
pub struct CommandLimiter<C: Clock = DefaultClock> {
    limiter: DirectLimiter<C>,
    clock: C,
}

impl CommandLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(DefaultClock::default())
    }
}

impl Default for CommandLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock + Clone> CommandLimiter<C> {
    pub fn with_clock(clock: C) -> Self {
        let quota = Quota::with_period(REPLENISH)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(BURST);

        Self {
            limiter: RateLimiter::direct_with_clock(quota, clock.clone()),
            clock,
        }
    }

    /// Take a slot, or report how long until one frees up
    pub fn check(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    /// Wait for a slot
    pub async fn acquire(&self) {
        while let Err(wait) = self.check() {
            tracing::trace!(wait_ms = wait.as_millis() as u64, "Command rate limited");
            tokio::time::sleep(wait).await;
        }
    }
}

impl<C: Clock> std::fmt::Debug for CommandLimiter<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandLimiter")
            .field("burst", &BURST)
            .field("replenish", &REPLENISH)
            .finish()
    }
}
