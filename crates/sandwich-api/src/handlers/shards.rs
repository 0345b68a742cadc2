//! Shard-facing RPCs
//!
//! Guild placement, raw gateway commands, member chunking, and the status of
//! every identity.

use axum::extract::State;
use sandwich_service::dto::{
    FetchStatusResponse, RequestGuildChunkRequest, RequestGuildChunkResponse,
    SendWebsocketMessageRequest, WhereIsGuildRequest, WhereIsGuildResponse,
};

use crate::extractors::RpcJson;
use crate::response::{ApiResult, Done, Rpc};
use crate::state::AppState;

/// POST /rpc/where_is_guild
pub async fn where_is_guild(
    State(state): State<AppState>,
    RpcJson(request): RpcJson<WhereIsGuildRequest>,
) -> Rpc<WhereIsGuildResponse> {
    Rpc(state.query().where_is_guild(&request))
}

/// POST /rpc/send_websocket_message
pub async fn send_websocket_message(
    State(state): State<AppState>,
    RpcJson(request): RpcJson<SendWebsocketMessageRequest>,
) -> ApiResult<Done> {
    state.query().send_websocket_message(&request).await?;
    Ok(Done)
}

/// POST /rpc/request_guild_chunk
///
/// With `wait`, answers once the last chunk arrived or the wait timed out.
pub async fn request_guild_chunk(
    State(state): State<AppState>,
    RpcJson(request): RpcJson<RequestGuildChunkRequest>,
) -> ApiResult<Rpc<RequestGuildChunkResponse>> {
    Ok(Rpc(state.query().request_guild_chunk(&request).await?))
}

/// GET /rpc/status
pub async fn fetch_status(State(state): State<AppState>) -> Rpc<FetchStatusResponse> {
    Rpc(state.query().fetch_status())
}
