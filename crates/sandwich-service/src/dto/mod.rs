//! Data transfer objects for the query RPCs
//!
//! Requests are validated before they reach the state store; responses are
//! wrapped in `RpcResponse` so every body carries `{ok, error}`.

pub mod requests;
pub mod responses;

pub use requests::{
    FetchGuildChildrenRequest, FetchGuildRequest, FetchMutualGuildsRequest, FetchUserRequest,
    RequestGuildChunkRequest, SendWebsocketMessageRequest, WhereIsGuildRequest,
};

pub use responses::{
    BaseResponse, FetchGuildChannelsResponse, FetchGuildEmojisResponse, FetchGuildMembersResponse,
    FetchGuildResponse, FetchGuildRolesResponse, FetchMutualGuildsResponse, FetchStatusResponse,
    FetchUserResponse, RequestGuildChunkResponse, RpcResponse, WhereIsGuildResponse,
};
