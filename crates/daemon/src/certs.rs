//! Cert distribution: the bundle manifest and individual gateway certs.

use common::gateway::{GatewayCert, GatewayId, GatewayType, VolumeCertBundle};
use common::volume::VolumeId;

use crate::error::{Error, Result};
use crate::service_state::State;

const MANIFEST_PREFIX: &str = "manifest.";

/// Parse the `manifest.{version}` path segment.
pub fn parse_manifest_segment(segment: &str) -> Result<u64> {
    segment
        .strip_prefix(MANIFEST_PREFIX)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::malformed(format!("bad manifest segment {:?}", segment)))
}

/// The current bundle, unless the caller asks for a version from the future.
pub async fn manifest(
    state: &State,
    volume_id: VolumeId,
    version: u64,
) -> Result<VolumeCertBundle> {
    let bundle = state
        .catalog()
        .cert_bundle(volume_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("certs of volume {}", volume_id)))?;
    if version > bundle.version {
        return Err(Error::NotFound(format!(
            "manifest {} of volume {} (current {})",
            version, volume_id, bundle.version
        )));
    }
    Ok(bundle)
}

/// The gateway's signed cert, if its type and cert version match.
pub async fn gateway_cert(
    state: &State,
    volume_id: VolumeId,
    cert_version: u64,
    gateway_type: GatewayType,
    gateway_id: GatewayId,
) -> Result<GatewayCert> {
    state
        .catalog()
        .gateway(gateway_id)
        .await?
        .map(|g| g.cert)
        .filter(|cert| {
            cert.volume_id == volume_id
                && cert.gateway_type == gateway_type
                && cert.cert_version == cert_version
        })
        .ok_or_else(|| {
            Error::NotFound(format!(
                "{} cert {} version {} in volume {}",
                gateway_type, gateway_id, cert_version, volume_id
            ))
        })
}
