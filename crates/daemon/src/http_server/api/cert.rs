use axum::extract::{Path, State};
use axum::http::{HeaderMap, Uri};
use axum::response::Response;

use common::gateway::{GatewayId, GatewayType};
use common::volume::VolumeId;

use crate::certs;
use crate::error::{Error, Result};
use crate::rpc::Rpc;
use crate::ServiceState;

use super::{admit, wire_response};

#[tracing::instrument(skip(state, uri, headers))]
pub async fn manifest_handler(
    State(state): State<ServiceState>,
    Path((volume_id, manifest)): Path<(VolumeId, String)>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response> {
    let version = certs::parse_manifest_segment(&manifest)?;
    admit(&state, Rpc::GetCertManifest, volume_id, &uri, &headers).await?;
    let bundle = certs::manifest(&state, volume_id, version).await?;
    wire_response(&bundle)
}

#[tracing::instrument(skip(state, uri, headers))]
pub async fn cert_handler(
    State(state): State<ServiceState>,
    Path((volume_id, cert_version, gateway_type, gateway_id, _cert_id)): Path<(
        VolumeId,
        u64,
        String,
        GatewayId,
        String,
    )>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Response> {
    let gateway_type: GatewayType = gateway_type.parse().map_err(Error::malformed)?;
    admit(&state, Rpc::GetCert, volume_id, &uri, &headers).await?;
    let cert = certs::gateway_cert(&state, volume_id, cert_version, gateway_type, gateway_id).await?;
    wire_response(&cert)
}
