//! Gateway registration: trade a user-signed request for a fresh session.

use std::time::Duration;

use common::crypto::SessionKey;
use common::entry::ROOT_FILE_ID;
use common::gateway::{Gateway, GatewayType, Session};
use common::messages::{FlowControl, RegisterRequest, RegistrationMetadata};
use common::signed::Signed;
use metadata_store::{StoreExt, Table};

use crate::cache_layer::CacheKey;
use crate::catalog::keys;
use crate::error::{Error, Result};
use crate::fanout;
use crate::service_state::State;

/// Path segments of `POST /REGISTER/{type}/{gateway}/{volume}/{user}`.
#[derive(Debug, Clone)]
pub struct RegisterTarget {
    pub gateway_type: String,
    pub gateway_name: String,
    pub volume_name: String,
    pub username: String,
}

fn session_expiry(now: i64, lifetime: Duration) -> i64 {
    now.saturating_add(i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX))
}

#[tracing::instrument(skip(state, body), fields(gateway = %target.gateway_name))]
pub async fn register(
    state: &State,
    target: &RegisterTarget,
    body: &[u8],
) -> Result<RegistrationMetadata> {
    let gateway_type: GatewayType = target.gateway_type.parse().map_err(Error::malformed)?;
    let request = RegisterRequest::from_wire(body).map_err(Error::malformed)?;
    if request.gateway_type != gateway_type
        || request.gateway_name != target.gateway_name
        || request.volume_name != target.volume_name
        || request.username != target.username
    {
        return Err(Error::malformed("request body does not match its path"));
    }

    let catalog = state.catalog();
    let user = catalog
        .user_by_name(&request.username)
        .await?
        .ok_or_else(|| Error::Unauthenticated(format!("unknown user {}", request.username)))?;
    if request.verify_with(&user.public_key).is_err() {
        return Err(Error::Unauthenticated("bad registration signature".to_string()));
    }

    let gateway = catalog
        .gateway_by_name(&request.gateway_name)
        .await?
        .filter(|g| g.gateway_type() == gateway_type)
        .ok_or_else(|| {
            Error::NotFound(format!("{} gateway {}", gateway_type, request.gateway_name))
        })?;
    if gateway.owner_id() != user.owner_id && !user.is_admin {
        return Err(Error::Forbidden(format!(
            "{} does not own gateway {}",
            user.username,
            gateway.id()
        )));
    }
    let volume = catalog
        .volume_by_name(&request.volume_name)
        .await?
        .filter(|v| v.volume_id == gateway.volume_id())
        .ok_or_else(|| Error::NotFound(format!("volume {}", request.volume_name)))?;

    // The session is fully built before anything is persisted.
    let session = Session {
        password: SessionKey::generate(),
        expires_at: session_expiry(
            chrono::Utc::now().timestamp(),
            state.config().session_lifetime(),
        ),
    };
    let issued = session.clone();
    let gateway_id = gateway.id();
    let updated: Option<Gateway> = state
        .store()
        .update_record(Table::Gateways, &keys::id(gateway_id), move |current: Option<Gateway>| {
            current.map(|mut g| {
                g.session = Some(issued);
                g
            })
        })
        .await?;
    let gateway = updated.ok_or_else(|| Error::NotFound(format!("gateway {}", gateway_id)))?;

    let entries = state.entries();
    let (root, num_files) = fanout::join(
        "registration snapshot",
        state.config().fetch_timeout(),
        async {
            tokio::try_join!(
                entries.lookup(volume.volume_id, ROOT_FILE_ID),
                catalog.file_count(volume.volume_id),
            )
        },
    )
    .await?;

    let reply = RegistrationMetadata {
        session_password: session.password,
        session_expires: session.expires_at,
        cert: gateway.cert.clone(),
        volume: volume.descriptor(root, num_files),
        sealed_private_key: gateway.sealed_private_key.clone(),
        flow_control: FlowControl::default(),
        signature: Vec::new(),
    }
    .signed_with(&volume.signing_key)
    .map_err(Error::signing)?;

    state
        .cache()
        .invalidate_many(&[
            CacheKey::Gateway(gateway_id),
            CacheKey::Volume(volume.volume_id),
        ])
        .await;

    tracing::info!(
        gateway_id,
        volume_id = volume.volume_id,
        expires_at = session.expires_at,
        "gateway registered"
    );
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_expiry_saturates() {
        assert_eq!(session_expiry(100, Duration::from_secs(50)), 150);
        assert_eq!(session_expiry(i64::MAX - 1, Duration::from_secs(10)), i64::MAX);
    }
}
