use serde::{Deserialize, Serialize};

use crate::crypto::{PublicKey, SecretKey};
use crate::entry::Entry;
use crate::user::OwnerId;

pub type VolumeId = u64;

/// Persisted volume record.
///
/// `signing_key` never leaves the service: gateways receive a
/// [`VolumeDescriptor`] carrying only the public half.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub volume_id: VolumeId,
    pub name: String,
    pub description: String,
    pub owner_id: OwnerId,
    /// Bumped on every administrative change to the volume itself.
    pub version: u64,
    /// Bumped whenever a client gateway is added, removed or changed.
    pub ug_version: u64,
    /// Bumped whenever a replica gateway is added, removed or changed.
    pub rg_version: u64,
    /// Version of the volume's cert bundle.
    pub cert_version: u64,
    pub allow_anon: bool,
    /// Default shard count for aggregates created under this volume.
    pub num_shards: u32,
    pub signing_key: SecretKey,
}

impl Volume {
    pub fn need_gateway_auth(&self) -> bool {
        !self.allow_anon
    }

    pub fn public_key(&self) -> PublicKey {
        self.signing_key.public()
    }

    pub fn descriptor(&self, root: Option<Entry>, num_files: i64) -> VolumeDescriptor {
        VolumeDescriptor {
            volume_id: self.volume_id,
            name: self.name.clone(),
            description: self.description.clone(),
            owner_id: self.owner_id,
            version: self.version,
            ug_version: self.ug_version,
            rg_version: self.rg_version,
            cert_version: self.cert_version,
            allow_anon: self.allow_anon,
            public_key: self.public_key(),
            num_files,
            root,
        }
    }
}

/// Volume snapshot handed to gateways.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeDescriptor {
    pub volume_id: VolumeId,
    pub name: String,
    pub description: String,
    pub owner_id: OwnerId,
    pub version: u64,
    pub ug_version: u64,
    pub rg_version: u64,
    pub cert_version: u64,
    pub allow_anon: bool,
    pub public_key: PublicKey,
    pub num_files: i64,
    pub root: Option<Entry>,
}
