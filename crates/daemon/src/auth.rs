//! Gateway session authentication.
//!
//! A gateway proves it holds its current session password by sending
//!
//! ```text
//! Authorization: Basic {TYPE}_{gateway_id}:{base64(mac(password, "{TYPE}_{gateway_id}:{url}"))}
//! ```
//!
//! where `url` is the request's path and query. A missing header means an
//! anonymous caller, which only volumes that allow anonymous access serve.
//! A header that is present is always fully verified.

use common::crypto::SessionKey;
use common::gateway::{Gateway, GatewayId, GatewayType, VolumeCertBundle};
use common::user::OwnerId;
use common::volume::{Volume, VolumeId};

use crate::entry_store::Identity;
use crate::error::{Error, Result};
use crate::fanout;
use crate::service_state::State;

const SCHEME: &str = "Basic ";

/// Parsed `Authorization` header. Parsing does no I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayToken {
    pub gateway_type: GatewayType,
    pub gateway_id: GatewayId,
    pub signature_b64: String,
}

impl GatewayToken {
    pub fn parse(header: &str) -> Result<Self> {
        let rest = header
            .strip_prefix(SCHEME)
            .ok_or_else(|| Error::malformed("unsupported authorization scheme"))?;
        let (principal, signature) = rest
            .split_once(':')
            .ok_or_else(|| Error::malformed("authorization header has no signature"))?;
        let (gateway_type, gateway_id) = principal
            .split_once('_')
            .ok_or_else(|| Error::malformed("authorization principal is not TYPE_ID"))?;

        let gateway_type = gateway_type.parse::<GatewayType>().map_err(Error::malformed)?;
        let gateway_id = gateway_id
            .parse::<GatewayId>()
            .map_err(|_| Error::malformed("gateway id is not a number"))?;
        if signature.is_empty() {
            return Err(Error::malformed("empty signature"));
        }
        Ok(Self {
            gateway_type,
            gateway_id,
            signature_b64: signature.to_string(),
        })
    }

    /// The MAC input for a request to `url`.
    pub fn signed_message(gateway_type: GatewayType, gateway_id: GatewayId, url: &str) -> String {
        format!("{}_{}:{}", gateway_type, gateway_id, url)
    }

    /// Full header value a gateway sends for a request to `url`.
    pub fn header_for(gateway: &Gateway, password: &SessionKey, url: &str) -> String {
        let message = Self::signed_message(gateway.gateway_type(), gateway.id(), url);
        format!(
            "{}{}_{}:{}",
            SCHEME,
            gateway.gateway_type(),
            gateway.id(),
            password.mac_b64(message.as_bytes())
        )
    }
}

/// Who is behind an authenticated request.
#[derive(Debug, Clone)]
pub enum Caller {
    Anonymous,
    Gateway(Box<Gateway>),
}

impl Caller {
    pub fn gateway(&self) -> Option<&Gateway> {
        match self {
            Caller::Anonymous => None,
            Caller::Gateway(gateway) => Some(gateway),
        }
    }

    pub fn owner_id(&self) -> Option<OwnerId> {
        self.gateway().map(Gateway::owner_id)
    }

    pub fn gateway_id(&self) -> Option<GatewayId> {
        self.gateway().map(Gateway::id)
    }

    pub fn identity(&self) -> Identity {
        Identity {
            owner_id: self.owner_id(),
            gateway_id: self.gateway_id(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Authenticated {
    pub volume: Volume,
    pub bundle: VolumeCertBundle,
    pub caller: Caller,
}

/// Resolve the caller of a request against `volume_id`.
///
/// `request_url` is the path and query the MAC was computed over.
pub async fn authenticate(
    state: &State,
    volume_id: VolumeId,
    header: Option<&str>,
    request_url: &str,
) -> Result<Authenticated> {
    let token = header.map(GatewayToken::parse).transpose()?;

    let catalog = state.catalog();
    let (volume, bundle, gateway) = fanout::join(
        "authentication records",
        state.config().fetch_timeout(),
        async {
            tokio::try_join!(
                catalog.volume(volume_id),
                catalog.cert_bundle(volume_id),
                async {
                    match &token {
                        Some(token) => catalog.gateway(token.gateway_id).await,
                        None => Ok(None),
                    }
                },
            )
        },
    )
    .await?;

    let volume = volume.ok_or_else(|| Error::NotFound(format!("volume {}", volume_id)))?;
    let bundle = bundle.ok_or_else(|| Error::NotFound(format!("certs of volume {}", volume_id)))?;

    let Some(token) = token else {
        if volume.need_gateway_auth() {
            return Err(Error::Forbidden(
                "volume requires gateway authentication".to_string(),
            ));
        }
        return Ok(Authenticated {
            volume,
            bundle,
            caller: Caller::Anonymous,
        });
    };

    let gateway = gateway
        .ok_or_else(|| Error::Forbidden(format!("no such gateway {}", token.gateway_id)))?;
    if gateway.gateway_type() != token.gateway_type {
        return Err(Error::Unauthenticated(format!(
            "gateway {} is not a {}",
            token.gateway_id, token.gateway_type
        )));
    }
    if gateway.volume_id() != volume_id || !bundle.contains(gateway.id()) {
        return Err(Error::Forbidden(format!(
            "gateway {} is not in volume {}",
            gateway.id(),
            volume_id
        )));
    }

    let now = chrono::Utc::now().timestamp();
    let password = gateway
        .live_session(now)
        .ok_or_else(|| Error::Forbidden("session expired".to_string()))?;
    let message = GatewayToken::signed_message(token.gateway_type, token.gateway_id, request_url);
    if !password.verify_b64(message.as_bytes(), &token.signature_b64) {
        tracing::debug!(gateway_id = gateway.id(), "session signature mismatch");
        return Err(Error::Forbidden("bad session signature".to_string()));
    }

    Ok(Authenticated {
        volume,
        bundle,
        caller: Caller::Gateway(Box::new(gateway)),
    })
}
