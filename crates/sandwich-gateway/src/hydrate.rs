//! Initial state for a freshly identified consumer
//!
//! A synthetic READY listing the consumer's guilds as unavailable, then one
//! GUILD_CREATE per cached guild that hashes into the consumer's shard.
//! Guilds cached while that ran are sent once the session is live.

use sandwich_core::entities::User;
use sandwich_core::{Snowflake, UnavailableGuild};
use sandwich_state::{GuildSnapshot, StateStore};
use serde::Serialize;
use serde_json::value::to_raw_value;

use crate::connection::Session;
use crate::error::GatewayError;
use crate::protocol::DispatchFrame;
use crate::server::GatewayState;

const GATEWAY_VERSION: u8 = 10;

#[derive(Debug, Serialize)]
struct ReadyData<'a> {
    v: u8,
    user: Option<&'a User>,
    session_id: &'a str,
    shard: [u32; 2],
    application: ApplicationData,
    resume_gateway_url: &'a str,
    guilds: Vec<UnavailableGuild>,
}

#[derive(Debug, Serialize)]
struct ApplicationData {
    id: Snowflake,
    flags: u64,
}

/// Cached guilds of one shard, ordered by id
pub fn shard_guilds(state: &StateStore, shard: [u32; 2]) -> Vec<Snowflake> {
    let [shard_id, shard_count] = shard;
    let mut guild_ids: Vec<Snowflake> = state
        .guild_ids()
        .into_iter()
        .filter(|id| id.shard_id(shard_count) == shard_id)
        .collect();
    guild_ids.sort_unstable();
    guild_ids
}

/// GUILD_CREATE body rebuilt from the cache
///
/// Members carry their user, and a guild without an AFK channel points the
/// field at itself.
pub fn guild_create(state: &StateStore, guild_id: Snowflake) -> Option<GuildSnapshot> {
    let mut snapshot = state.guild_snapshot(guild_id)?;
    if snapshot.guild.afk_channel_id.is_none() {
        snapshot.guild.afk_channel_id = Some(guild_id);
    }
    snapshot.members = state
        .members(guild_id)
        .into_iter()
        .map(|mut member| {
            member.user = state.user(member.user_id);
            member
        })
        .collect();
    Some(snapshot)
}

/// Queue READY and the GUILD_CREATEs; returns the number of guilds sent
///
/// The session starts receiving routed dispatches once this returns, so
/// READY is always its first frame.
pub fn hydrate(gateway: &GatewayState, session: &Session) -> Result<usize, GatewayError> {
    let manager = gateway.manager();
    let user = manager.as_ref().and_then(|manager| manager.user());
    let state = gateway.state();

    let guild_ids = state
        .as_deref()
        .map(|state| shard_guilds(state, session.shard()))
        .unwrap_or_default();

    let ready = ReadyData {
        v: GATEWAY_VERSION,
        user: user.as_ref(),
        session_id: session.id(),
        shard: session.shard(),
        application: ApplicationData {
            id: user.as_ref().map(|u| u.id).unwrap_or_default(),
            flags: user.as_ref().map_or(0, |u| u.flags),
        },
        resume_gateway_url: &gateway.settings().resume_gateway_url,
        guilds: guild_ids.iter().copied().map(UnavailableGuild::new).collect(),
    };
    let d = to_raw_value(&ready)?;
    session.push(&DispatchFrame::synthetic("READY", &d))?;

    let Some(state) = state else {
        session.go_live();
        return Ok(0);
    };

    let mut sent = 0;
    for &guild_id in &guild_ids {
        // Evicted since READY was built
        let Some(snapshot) = guild_create(&state, guild_id) else {
            continue;
        };
        let d = to_raw_value(&snapshot)?;
        session.push(&DispatchFrame::synthetic("GUILD_CREATE", &d))?;
        sent += 1;
    }
    session.go_live();
    sent += catch_up(&state, session, &guild_ids)?;

    tracing::debug!(
        session_id = %session.id(),
        shard = ?session.shard(),
        guilds = sent,
        "Hydrated consumer"
    );
    Ok(sent)
}

/// GUILD_CREATE for guilds of the session's shard missing from `known`
///
/// Covers guilds cached between the hydration snapshot and `go_live`, whose
/// dispatch was routed before the session took any. `known` is sorted.
pub fn catch_up(
    state: &StateStore,
    session: &Session,
    known: &[Snowflake],
) -> Result<usize, GatewayError> {
    let mut sent = 0;
    for guild_id in shard_guilds(state, session.shard()) {
        if known.binary_search(&guild_id).is_ok() {
            continue;
        }
        let Some(snapshot) = guild_create(state, guild_id) else {
            continue;
        };
        let d = to_raw_value(&snapshot)?;
        session.push(&DispatchFrame::synthetic("GUILD_CREATE", &d))?;
        sent += 1;
    }
    if sent > 0 {
        tracing::debug!(session_id = %session.id(), guilds = sent, "Sent guilds cached during hydration");
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use sandwich_common::{ClusterConfig, IdentityConfig};
    use sandwich_core::entities::{Guild, GuildMember, Role};
    use sandwich_shard::rest::DiscordRest;
    use sandwich_shard::{Manager, Resources};
    use sandwich_state::StoreOptions;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::connection::{Hub, Queued};
    use crate::server::GatewaySettings;

    fn guild_id(timestamp_part: u64) -> Snowflake {
        Snowflake::new(timestamp_part << 22)
    }

    fn manager() -> Arc<Manager> {
        let resources = Resources::new(
            StateStore::new_shared(),
            DiscordRest::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap(),
            4,
            ClusterConfig {
                node_count: 1,
                node_id: 0,
            },
        );
        Manager::new(
            IdentityConfig::new("app", "token"),
            Arc::new(resources),
            &CancellationToken::new(),
        )
    }

    fn gateway(manager: &Arc<Manager>) -> GatewayState {
        GatewayState::new(
            Arc::new(Hub::default()),
            Arc::downgrade(manager),
            GatewaySettings {
                expected_token: "token".to_string(),
                resume_gateway_url: "ws://127.0.0.1:9000".to_string(),
            },
            CancellationToken::new(),
        )
    }

    fn ingest(state: &StateStore, id: Snowflake) {
        let member = GuildMember {
            user: Some(User::new(Snowflake::new(77), "consumer".to_string())),
            ..GuildMember::default()
        };
        state.ingest_guild(
            GuildSnapshot {
                guild: Guild::new(id, format!("guild {id}")),
                roles: vec![Role::new(id, id, "@everyone".to_string())],
                members: vec![member],
                ..GuildSnapshot::default()
            },
            StoreOptions::default(),
        );
    }

    fn frames(session: &Session) -> Vec<serde_json::Value> {
        session
            .drain()
            .into_iter()
            .map(|queued| match queued {
                Queued::Dispatch { text, .. } => serde_json::from_str(&text).unwrap(),
                Queued::Kick { .. } => panic!("unexpected kick"),
            })
            .collect()
    }

    #[test]
    fn test_hydrate_filters_by_shard_hash() {
        let manager = manager();
        let mut me = User::new(Snowflake::new(5), "sandwich".to_string());
        me.flags = 64;
        manager.set_user(me);

        let state = &manager.resources().state;
        let (a, b, c) = (guild_id(2), guild_id(4), guild_id(3));
        for id in [c, b, a] {
            ingest(state, id);
        }

        let gateway = gateway(&manager);
        let session = gateway.hub().create([0, 2]);
        assert!(!session.is_live());
        assert_eq!(hydrate(&gateway, &session).unwrap(), 2);
        assert!(session.is_live());

        let frames = frames(&session);
        assert_eq!(frames.len(), 3);

        let ready = &frames[0];
        assert_eq!(ready["t"], "READY");
        assert_eq!(ready["s"], 0);
        assert_eq!(ready["d"]["session_id"], session.id());
        assert_eq!(ready["d"]["shard"], serde_json::json!([0, 2]));
        assert_eq!(ready["d"]["user"]["username"], "sandwich");
        assert_eq!(ready["d"]["application"]["id"], "5");
        assert_eq!(ready["d"]["application"]["flags"], 64);
        assert_eq!(ready["d"]["resume_gateway_url"], "ws://127.0.0.1:9000");
        assert_eq!(
            ready["d"]["guilds"],
            serde_json::json!([
                {"id": a.to_string(), "unavailable": true},
                {"id": b.to_string(), "unavailable": true},
            ])
        );

        assert_eq!(frames[1]["t"], "GUILD_CREATE");
        assert_eq!(frames[1]["s"], 1);
        assert_eq!(frames[1]["d"]["id"], a.to_string());
        assert_eq!(frames[2]["s"], 2);
        assert_eq!(frames[2]["d"]["id"], b.to_string());
    }

    #[test]
    fn test_guild_create_fills_cache_fields() {
        let state = StateStore::new();
        let id = guild_id(2);
        ingest(&state, id);

        let snapshot = guild_create(&state, id).unwrap();
        assert_eq!(snapshot.guild.afk_channel_id, Some(id));
        assert_eq!(snapshot.roles.len(), 1);
        assert_eq!(snapshot.members.len(), 1);
        assert_eq!(
            snapshot.members[0].user.as_ref().map(|u| u.username.as_str()),
            Some("consumer")
        );

        assert!(guild_create(&state, guild_id(9)).is_none());
    }

    #[test]
    fn test_hydrate_without_identity() {
        let gateway = GatewayState::new(
            Arc::new(Hub::default()),
            std::sync::Weak::new(),
            GatewaySettings {
                expected_token: "token".to_string(),
                resume_gateway_url: "ws://localhost".to_string(),
            },
            CancellationToken::new(),
        );
        let session = gateway.hub().create([0, 1]);

        assert_eq!(hydrate(&gateway, &session).unwrap(), 0);
        let frames = frames(&session);
        assert_eq!(frames.len(), 1);
        assert!(frames[0]["d"]["user"].is_null());
        assert_eq!(frames[0]["d"]["guilds"], serde_json::json!([]));
    }

    #[test]
    fn test_guilds_cached_during_hydration_are_sent() {
        let manager = manager();
        let state = &manager.resources().state;
        let (early, late, other) = (guild_id(2), guild_id(4), guild_id(3));
        ingest(state, early);

        let gateway = gateway(&manager);
        let session = gateway.hub().create([0, 2]);
        let known = shard_guilds(state, session.shard());
        assert_eq!(hydrate(&gateway, &session).unwrap(), 1);
        assert_eq!(frames(&session).len(), 2);

        // Arrived after the snapshot; its own dispatch never reached the session
        ingest(state, late);
        ingest(state, other);

        assert_eq!(catch_up(state, &session, &known).unwrap(), 1);
        let frames = frames(&session);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["t"], "GUILD_CREATE");
        assert_eq!(frames[0]["s"], 2);
        assert_eq!(frames[0]["d"]["id"], late.to_string());

        // Nothing new to send
        let known = shard_guilds(state, session.shard());
        assert_eq!(catch_up(state, &session, &known).unwrap(), 0);
    }
}
