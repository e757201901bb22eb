use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Uri};
use axum::response::Response;

use common::messages::{UpdateOutcome, UpdateReply};
use common::signed::Signed;
use common::volume::VolumeId;

use crate::error::{Error, Result};
use crate::resolve::{self, volume_versions, ResolveQuery};
use crate::rpc::Rpc;
use crate::updates;
use crate::ServiceState;

use super::{admit, parse_file_id, wire_response};

#[tracing::instrument(skip(state, uri, headers))]
pub async fn resolve_handler(
    State(state): State<ServiceState>,
    Path((volume_id, file_id, file_version, write_nonce)): Path<(VolumeId, String, i64, i64)>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response> {
    let file_id = parse_file_id(&file_id)?;
    let authenticated = admit(&state, Rpc::Resolve, volume_id, &uri, &headers).await?;

    let query = ResolveQuery {
        file_id,
        file_version,
        write_nonce,
    };
    let reply = resolve::resolve(
        &state,
        authenticated.caller.identity(),
        &authenticated.volume,
        query,
    )
    .await?;
    wire_response(&reply)
}

#[tracing::instrument(skip(state, uri, headers, body))]
pub async fn update_handler(
    State(state): State<ServiceState>,
    Path(volume_id): Path<VolumeId>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response> {
    let authenticated = admit(&state, Rpc::UpdateMetadata, volume_id, &uri, &headers).await?;
    let reply = updates::apply_updates(
        &state,
        &authenticated.caller,
        &authenticated.volume,
        &body,
    )
    .await?;
    wire_response(&reply)
}

/// Single delete, answered with a one-slot [`UpdateReply`].
#[tracing::instrument(skip(state, uri, headers))]
pub async fn delete_handler(
    State(state): State<ServiceState>,
    Path((volume_id, file_id)): Path<(VolumeId, String)>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response> {
    let file_id = parse_file_id(&file_id)?;
    let authenticated = admit(&state, Rpc::DeleteEntry, volume_id, &uri, &headers).await?;
    let volume = &authenticated.volume;

    let outcome = match state
        .entries()
        .delete(authenticated.caller.identity(), volume_id, file_id)
        .await
    {
        Ok(deleted) => UpdateOutcome::Deleted(deleted),
        Err(Error::Rejected(code)) => UpdateOutcome::Err(code),
        Err(e) => return Err(e),
    };
    let reply = UpdateReply {
        volume_id,
        versions: volume_versions(volume),
        results: vec![outcome],
        signature: Vec::new(),
    }
    .signed_with(&volume.signing_key)
    .map_err(Error::signing)?;
    wire_response(&reply)
}
