use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, Uri};
use axum::response::Response;
use serde::Deserialize;

use common::volume::VolumeId;

use crate::error::Result;
use crate::queries;
use crate::resolve::ResolveQuery;
use crate::rpc::Rpc;
use crate::ServiceState;

use super::{admit, parse_file_id, wire_response};

#[tracing::instrument(skip(state, uri, headers))]
pub async fn getattr_handler(
    State(state): State<ServiceState>,
    Path((volume_id, file_id, file_version, write_nonce)): Path<(VolumeId, String, i64, i64)>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response> {
    let file_id = parse_file_id(&file_id)?;
    let authenticated = admit(&state, Rpc::GetAttr, volume_id, &uri, &headers).await?;
    let query = ResolveQuery {
        file_id,
        file_version,
        write_nonce,
    };
    let reply = queries::getattr(
        &state,
        authenticated.caller.identity(),
        &authenticated.volume,
        query,
    )
    .await?;
    wire_response(&reply)
}

#[tracing::instrument(skip(state, uri, headers))]
pub async fn getchild_handler(
    State(state): State<ServiceState>,
    Path((volume_id, parent_id, name)): Path<(VolumeId, String, String)>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response> {
    let parent_id = parse_file_id(&parent_id)?;
    let authenticated = admit(&state, Rpc::GetChild, volume_id, &uri, &headers).await?;
    let reply = queries::getchild(
        &state,
        authenticated.caller.identity(),
        &authenticated.volume,
        parent_id,
        &name,
    )
    .await?;
    wire_response(&reply)
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    #[serde(default)]
    pub page_id: u32,
}

#[tracing::instrument(skip(state, uri, headers))]
pub async fn listdir_handler(
    State(state): State<ServiceState>,
    Path((volume_id, file_id)): Path<(VolumeId, String)>,
    Query(params): Query<PageParams>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response> {
    let file_id = parse_file_id(&file_id)?;
    let authenticated = admit(&state, Rpc::ListDir, volume_id, &uri, &headers).await?;
    let reply = queries::listdir(
        &state,
        authenticated.caller.identity(),
        &authenticated.volume,
        file_id,
        params.page_id,
    )
    .await?;
    wire_response(&reply)
}

#[tracing::instrument(skip(state, uri, headers))]
pub async fn getxattr_handler(
    State(state): State<ServiceState>,
    Path((volume_id, file_id, name)): Path<(VolumeId, String, String)>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response> {
    let file_id = parse_file_id(&file_id)?;
    let authenticated = admit(&state, Rpc::GetXattr, volume_id, &uri, &headers).await?;
    let reply = queries::getxattr(
        &state,
        authenticated.caller.identity(),
        &authenticated.volume,
        file_id,
        &name,
    )
    .await?;
    wire_response(&reply)
}

#[tracing::instrument(skip(state, uri, headers))]
pub async fn listxattr_handler(
    State(state): State<ServiceState>,
    Path((volume_id, file_id)): Path<(VolumeId, String)>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response> {
    let file_id = parse_file_id(&file_id)?;
    let authenticated = admit(&state, Rpc::ListXattr, volume_id, &uri, &headers).await?;
    let reply = queries::listxattr(
        &state,
        authenticated.caller.identity(),
        &authenticated.volume,
        file_id,
    )
    .await?;
    wire_response(&reply)
}
