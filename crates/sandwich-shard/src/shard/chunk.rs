//! Member chunking
//!
//! A request is matched to its GUILD_MEMBERS_CHUNK replies by a random nonce.
//! It completes on the last chunk, or softly once replies stop for
//! [`CHUNK_IDLE_TIMEOUT`]. No reply at all within [`CHUNK_START_TIMEOUT`] is
//! an error.

use std::sync::Arc;
use std::time::Duration;

use sandwich_common::{SandwichError, SandwichResult};
use sandwich_core::{Intents, Snowflake};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::Shard;
use crate::dispatch::ChunkProgress;
use crate::protocol::{OpCode, RequestGuildMembersPayload};

pub const CHUNK_START_TIMEOUT: Duration = Duration::from_secs(10);
pub const CHUNK_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ChunkOutcome {
    /// Cached members already cover the guild's member count
    Skipped,
    Completed { chunks: u32, members: usize },
}

fn random_nonce() -> String {
    format!("{:016x}", rand::random::<u64>())
}

/// Removes the nonce once the request is over
struct PendingChunk<'a> {
    shard: &'a Shard,
    nonce: String,
}

impl Drop for PendingChunk<'_> {
    fn drop(&mut self) {
        self.shard.chunks.remove(&self.nonce);
    }
}

impl Shard {
    /// Request every member of a guild and wait for the replies
    ///
    /// Unless `always` is set the request is skipped when the cache already
    /// holds `member_count` members.
    pub async fn chunk_guild(&self, guild_id: Snowflake, always: bool) -> SandwichResult<ChunkOutcome> {
        let state = &self.resources.state;
        if !always {
            if let Some(guild) = state.guild(guild_id) {
                if state.cached_member_count(guild_id) >= guild.member_count as usize {
                    return Ok(ChunkOutcome::Skipped);
                }
            }
        }

        let nonce = random_nonce();
        let (tx, rx) = mpsc::unbounded_channel();
        self.chunks.insert(nonce.clone(), tx);
        let pending = PendingChunk {
            shard: self,
            nonce: nonce.clone(),
        };

        let request = RequestGuildMembersPayload {
            guild_id,
            query: String::new(),
            limit: 0,
            presences: self
                .config
                .identity
                .bot
                .intents
                .contains(Intents::GUILD_PRESENCES),
            nonce,
        };
        self.send_event(OpCode::RequestGuildMembers, &request).await?;

        let cancel = self
            .group
            .upgrade()
            .map_or_else(|| self.cancel.clone(), |group| group.chunk_cancel());

        let outcome = wait_for_chunks(rx, &cancel).await;
        drop(pending);

        match &outcome {
            Ok(ChunkOutcome::Completed { chunks, members }) => tracing::debug!(
                shard_id = self.shard_id(),
                guild_id = %guild_id,
                chunks = chunks,
                members = members,
                "Chunked guild"
            ),
            Ok(ChunkOutcome::Skipped) => {}
            Err(e) => tracing::warn!(
                shard_id = self.shard_id(),
                guild_id = %guild_id,
                error = %e,
                "Chunking failed"
            ),
        }
        outcome
    }

    /// Chunk every guild of this shard, one after another
    pub(super) fn spawn_startup_chunking(self: &Arc<Self>) {
        if !self.config.identity.caching.request_members {
            return;
        }

        let shard = Arc::clone(self);
        tokio::spawn(async move {
            let guild_ids = shard.guild_ids();
            tracing::debug!(shard_id = shard.shard_id(), guilds = guild_ids.len(), "Chunking all guilds");

            for guild_id in guild_ids {
                if let Err(SandwichError::Cancelled) = shard.chunk_guild(guild_id, false).await {
                    return;
                }
            }
        });
    }
}

async fn wait_for_chunks(
    mut rx: mpsc::UnboundedReceiver<ChunkProgress>,
    cancel: &CancellationToken,
) -> SandwichResult<ChunkOutcome> {
    let mut chunks = 0u32;
    let mut members = 0usize;

    loop {
        let window = if chunks == 0 {
            CHUNK_START_TIMEOUT
        } else {
            CHUNK_IDLE_TIMEOUT
        };

        let next = tokio::select! {
            () = cancel.cancelled() => return Err(SandwichError::Cancelled),
            next = tokio::time::timeout(window, rx.recv()) => next,
        };

        match next {
            Ok(Some(progress)) => {
                chunks += 1;
                members += progress.members;
                if progress.is_last() || chunks >= progress.chunk_count {
                    return Ok(ChunkOutcome::Completed { chunks, members });
                }
            }
            Ok(None) => return Err(SandwichError::Cancelled),
            Err(_) if chunks == 0 => {
                return Err(SandwichError::Transport(format!(
                    "no member chunk within {} s",
                    CHUNK_START_TIMEOUT.as_secs()
                )))
            }
            // Replies stopped early
            Err(_) => return Ok(ChunkOutcome::Completed { chunks, members }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(index: u32, count: u32) -> ChunkProgress {
        ChunkProgress {
            guild_id: Snowflake::new(1),
            chunk_index: index,
            chunk_count: count,
            members: 1000,
        }
    }

    #[test]
    fn test_nonce_shape() {
        let nonce = random_nonce();
        assert_eq!(nonce.len(), 16);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_on_last_chunk() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(progress(0, 2)).unwrap();
        tx.send(progress(1, 2)).unwrap();

        let outcome = wait_for_chunks(rx, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, ChunkOutcome::Completed { chunks: 2, members: 2000 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_completion() {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(progress(0, 3)).unwrap();

        let started = tokio::time::Instant::now();
        let outcome = wait_for_chunks(rx, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, ChunkOutcome::Completed { chunks: 1, members: 1000 });
        assert!(started.elapsed() >= CHUNK_IDLE_TIMEOUT);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_timeout() {
        let (tx, rx) = mpsc::unbounded_channel::<ChunkProgress>();
        let started = tokio::time::Instant::now();

        let err = wait_for_chunks(rx, &CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.kind(), sandwich_common::ErrorKind::Transport);
        assert!(started.elapsed() >= CHUNK_START_TIMEOUT);
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled() {
        let (tx, rx) = mpsc::unbounded_channel::<ChunkProgress>();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = wait_for_chunks(rx, &cancel).await.unwrap_err();
        assert_eq!(err.kind(), sandwich_common::ErrorKind::Cancelled);
        drop(tx);
    }
}
