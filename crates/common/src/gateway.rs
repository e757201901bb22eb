use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::caps::Capabilities;
use crate::crypto::{PublicKey, SessionKey};
use crate::user::OwnerId;
use crate::volume::VolumeId;

pub type GatewayId = u64;

/// Kind of gateway. The wire names (`UG`, `RG`, `AG`) appear in the
/// authorization header, registration paths and cert URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GatewayType {
    /// Client ("user") gateway.
    User,
    /// Replica gateway.
    Replica,
    /// Acquisition gateway.
    Acquisition,
}

impl GatewayType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GatewayType::User => "UG",
            GatewayType::Replica => "RG",
            GatewayType::Acquisition => "AG",
        }
    }
}

impl fmt::Display for GatewayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown gateway type: {0}")]
pub struct UnknownGatewayType(pub String);

impl FromStr for GatewayType {
    type Err = UnknownGatewayType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UG" => Ok(GatewayType::User),
            "RG" => Ok(GatewayType::Replica),
            "AG" => Ok(GatewayType::Acquisition),
            other => Err(UnknownGatewayType(other.to_string())),
        }
    }
}

/// Volume-signed certificate describing a gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayCert {
    pub gateway_id: GatewayId,
    pub gateway_type: GatewayType,
    pub volume_id: VolumeId,
    pub owner_id: OwnerId,
    pub name: String,
    pub public_key: PublicKey,
    pub caps: Capabilities,
    pub cert_version: u64,
    pub signature: Vec<u8>,
}

crate::impl_signed!(GatewayCert);

/// Currently issued session credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub password: SessionKey,
    /// Unix seconds.
    pub expires_at: i64,
}

impl Session {
    pub fn is_live(&self, now: i64) -> bool {
        now < self.expires_at
    }
}

/// Persisted gateway record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gateway {
    pub cert: GatewayCert,
    /// `None` until the gateway first registers.
    pub session: Option<Session>,
    /// Gateway private key sealed by its owner for offline delivery.
    pub sealed_private_key: Option<Vec<u8>>,
}

impl Gateway {
    pub fn id(&self) -> GatewayId {
        self.cert.gateway_id
    }

    pub fn gateway_type(&self) -> GatewayType {
        self.cert.gateway_type
    }

    pub fn volume_id(&self) -> VolumeId {
        self.cert.volume_id
    }

    pub fn owner_id(&self) -> OwnerId {
        self.cert.owner_id
    }

    pub fn caps(&self) -> Capabilities {
        self.cert.caps
    }

    /// The live session key at `now`, if any.
    pub fn live_session(&self, now: i64) -> Option<&SessionKey> {
        self.session
            .as_ref()
            .filter(|s| s.is_live(now))
            .map(|s| &s.password)
    }
}

/// One line of a [`VolumeCertBundle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertSummary {
    pub gateway_id: GatewayId,
    pub gateway_type: GatewayType,
    pub caps: Capabilities,
    pub cert_version: u64,
}

/// Ordered list of every gateway cert in a volume.
///
/// Gateways poll the bundle version and only re-fetch the individual
/// certs whose `cert_version` moved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeCertBundle {
    pub volume_id: VolumeId,
    pub version: u64,
    pub certs: Vec<CertSummary>,
    pub signature: Vec<u8>,
}

crate::impl_signed!(VolumeCertBundle);

impl VolumeCertBundle {
    pub fn empty(volume_id: VolumeId) -> Self {
        Self {
            volume_id,
            version: 1,
            certs: Vec::new(),
            signature: Vec::new(),
        }
    }

    pub fn contains(&self, gateway_id: GatewayId) -> bool {
        self.certs.iter().any(|c| c.gateway_id == gateway_id)
    }

    /// Replace or insert the summary for `cert`, keeping the list sorted by id.
    pub fn upsert(&mut self, cert: &GatewayCert) {
        let summary = CertSummary {
            gateway_id: cert.gateway_id,
            gateway_type: cert.gateway_type,
            caps: cert.caps,
            cert_version: cert.cert_version,
        };
        match self
            .certs
            .binary_search_by_key(&cert.gateway_id, |c| c.gateway_id)
        {
            Ok(idx) => self.certs[idx] = summary,
            Err(idx) => self.certs.insert(idx, summary),
        }
    }

    pub fn remove(&mut self, gateway_id: GatewayId) {
        self.certs.retain(|c| c.gateway_id != gateway_id);
    }
}
