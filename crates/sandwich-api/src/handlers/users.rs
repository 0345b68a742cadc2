//! User lookups

use axum::extract::State;
use sandwich_service::dto::{
    FetchMutualGuildsRequest, FetchMutualGuildsResponse, FetchUserRequest, FetchUserResponse,
};

use crate::extractors::RpcJson;
use crate::response::{ApiResult, Rpc};
use crate::state::AppState;

/// POST /rpc/fetch_user
pub async fn fetch_user(
    State(state): State<AppState>,
    RpcJson(request): RpcJson<FetchUserRequest>,
) -> ApiResult<Rpc<FetchUserResponse>> {
    Ok(Rpc(state.query().fetch_user(&request)?))
}

/// POST /rpc/fetch_mutual_guilds
pub async fn fetch_mutual_guilds(
    State(state): State<AppState>,
    RpcJson(request): RpcJson<FetchMutualGuildsRequest>,
) -> ApiResult<Rpc<FetchMutualGuildsResponse>> {
    Ok(Rpc(state.query().fetch_mutual_guilds(&request)?))
}
