//! Identify coordinator
//!
//! Discord lets `max_concurrency` shards of one bot identify in parallel.
//! Shards with the same `shard_id % max_concurrency` share a bucket; each
//! bucket holds a single token that comes back 5 s after it was taken.
//! Buckets are keyed by domain: the identity's configured
//! `identify_domain`, or the hash of its token. The coordinator is
//! process-wide, so managers in one domain draw from the same buckets.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sandwich_common::{IdentityConfig, SandwichError, SandwichResult};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

/// Delay before a used identify token returns to its bucket
pub const IDENTIFY_INTERVAL: Duration = Duration::from_secs(5);

/// Default domain of a bot token: its sha256 in hex
pub fn token_domain(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Domain an identity identifies in
pub fn identify_domain(identity: &IdentityConfig) -> String {
    identity
        .identify_domain()
        .map_or_else(|| token_domain(identity.bare_token()), str::to_string)
}

/// Bucket name for a shard: `identify:<domain>:<shard_id % max_concurrency>`
pub fn bucket_key(domain: &str, shard_id: u32, max_concurrency: u32) -> String {
    format!("identify:{domain}:{}", shard_id % max_concurrency.max(1))
}

struct Bucket {
    tokens: Mutex<mpsc::Receiver<()>>,
    refill: mpsc::Sender<()>,
}

impl Bucket {
    fn new() -> Arc<Self> {
        let (refill, tokens) = mpsc::channel(1);
        // Capacity 1 on a fresh channel; cannot fail
        let _ = refill.try_send(());
        Arc::new(Self {
            tokens: Mutex::new(tokens),
            refill,
        })
    }
}

/// Process-wide identify buckets
pub struct IdentifyCoordinator {
    buckets: DashMap<String, Arc<Bucket>>,
    interval: Duration,
}

impl Default for IdentifyCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentifyCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::with_interval(IDENTIFY_INTERVAL)
    }

    #[must_use]
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            interval,
        }
    }

    /// Wait until the shard may send Identify
    ///
    /// Waiters on one bucket are served in arrival order. The token is
    /// returned to the bucket `interval` after this call resolves.
    pub async fn acquire(
        &self,
        domain: &str,
        shard_id: u32,
        max_concurrency: u32,
        cancel: &CancellationToken,
    ) -> SandwichResult<()> {
        let key = bucket_key(domain, shard_id, max_concurrency);
        let bucket = self
            .buckets
            .entry(key.clone())
            .or_insert_with(Bucket::new)
            .clone();

        tokio::select! {
            () = cancel.cancelled() => return Err(SandwichError::Cancelled),
            taken = async {
                let mut tokens = bucket.tokens.lock().await;
                tokens.recv().await
            } => {
                if taken.is_none() {
                    return Err(SandwichError::Cancelled);
                }
            }
        }

        tracing::debug!(shard_id = shard_id, bucket = %key, "Identify slot acquired");

        let interval = self.interval;
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let _ = bucket.refill.send(()).await;
        });

        Ok(())
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

impl std::fmt::Debug for IdentifyCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifyCoordinator")
            .field("buckets", &self.buckets.len())
            .field("interval", &self.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn test_bucket_key() {
        let key = bucket_key(&token_domain("token"), 5, 2);
        assert!(key.starts_with("identify:"));
        assert!(key.ends_with(":1"));
        // sha256 hex is 64 characters
        assert_eq!(key.len(), "identify:".len() + 64 + 2);

        assert_eq!(bucket_key("token", 0, 2), bucket_key("token", 2, 2));
        assert_ne!(bucket_key("token", 0, 2), bucket_key("other", 0, 2));
        assert_eq!(bucket_key("token", 3, 0), bucket_key("token", 0, 1));
    }

    #[test]
    fn test_identify_domain() {
        let first = IdentityConfig::new("first", "Bot token-a");
        let second = IdentityConfig::new("second", "token-a");
        assert_eq!(identify_domain(&first), token_domain("token-a"));
        assert_eq!(identify_domain(&first), identify_domain(&second));

        let mut fleet = IdentityConfig::new("fleet", "token-b");
        fleet.sharding.identify_domain = Some("welcomer-fleet".to_string());
        assert_eq!(identify_domain(&fleet), "welcomer-fleet");
        assert_eq!(bucket_key(&identify_domain(&fleet), 1, 1), "identify:welcomer-fleet:0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_domain_shares_buckets_across_tokens() {
        let coordinator = IdentifyCoordinator::new();
        let cancel = CancellationToken::new();

        let mut first = IdentityConfig::new("first", "token-a");
        first.sharding.identify_domain = Some("fleet".to_string());
        let mut second = IdentityConfig::new("second", "token-b");
        second.sharding.identify_domain = Some("fleet".to_string());

        coordinator
            .acquire(&identify_domain(&first), 0, 1, &cancel)
            .await
            .unwrap();
        let start = Instant::now();
        coordinator
            .acquire(&identify_domain(&second), 0, 1, &cancel)
            .await
            .unwrap();
        assert!(start.elapsed() >= IDENTIFY_INTERVAL);
        assert_eq!(coordinator.bucket_count(), 1);

        // Same token, no domain: a bucket of its own
        let start = Instant::now();
        let plain = IdentityConfig::new("plain", "token-a");
        coordinator
            .acquire(&identify_domain(&plain), 0, 1, &cancel)
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_two_four_shards() {
        let coordinator = Arc::new(IdentifyCoordinator::new());
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let mut handles = Vec::new();
        for shard_id in 0..4u32 {
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                coordinator.acquire("tok", shard_id, 2, &cancel).await.unwrap();
                (shard_id, start.elapsed())
            }));
            // Keep arrival order deterministic
            tokio::task::yield_now().await;
        }

        let mut elapsed = [Duration::ZERO; 4];
        for handle in handles {
            let (shard_id, at) = handle.await.unwrap();
            elapsed[shard_id as usize] = at;
        }

        assert!(elapsed[0] < Duration::from_secs(1));
        assert!(elapsed[1] < Duration::from_secs(1));
        assert!(elapsed[2] >= IDENTIFY_INTERVAL);
        assert!(elapsed[3] >= IDENTIFY_INTERVAL);
        assert_eq!(coordinator.bucket_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shared_across_identities_with_same_token() {
        let coordinator = IdentifyCoordinator::new();
        let cancel = CancellationToken::new();

        coordinator.acquire("tok", 0, 1, &cancel).await.unwrap();
        let start = Instant::now();
        coordinator.acquire("tok", 1, 1, &cancel).await.unwrap();
        assert!(start.elapsed() >= IDENTIFY_INTERVAL);

        // A different token has its own bucket
        let start = Instant::now();
        coordinator.acquire("other", 0, 1, &cancel).await.unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_while_waiting() {
        let coordinator = IdentifyCoordinator::new();
        let cancel = CancellationToken::new();

        coordinator.acquire("tok", 0, 1, &cancel).await.unwrap();

        let waiter_cancel = cancel.clone();
        let waiter = async { coordinator.acquire("tok", 0, 1, &waiter_cancel).await };
        let canceller = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            cancel.cancel();
        };

        let (result, ()) = tokio::join!(waiter, canceller);
        assert!(matches!(result, Err(SandwichError::Cancelled)));
    }
}
