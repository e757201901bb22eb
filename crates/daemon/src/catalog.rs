//! Read-through lookups of volumes, gateways, users and cert bundles.

use serde::de::DeserializeOwned;
use serde::Serialize;

use common::entry::FileId;
use common::gateway::{Gateway, GatewayId, VolumeCertBundle};
use common::user::{OwnerId, User};
use common::volume::{Volume, VolumeId};
use metadata_store::{StoreExt, Table};

use crate::cache_layer::CacheKey;
use crate::error::Result;
use crate::service_state::State;

/// Record keys. Ids are zero-padded hex so prefix scans never collide.
pub mod keys {
    use super::*;

    pub fn id(id: u64) -> String {
        format!("{:016x}", id)
    }

    pub fn entry(volume_id: VolumeId, file_id: FileId) -> String {
        format!("{:016x}:{:016x}", volume_id, file_id)
    }

    /// Prefix shared by every name holder under one directory.
    pub fn children_prefix(volume_id: VolumeId, parent_id: FileId) -> String {
        format!("{:016x}:{:016x}:", volume_id, parent_id)
    }

    pub fn name_holder(volume_id: VolumeId, parent_id: FileId, name: &str) -> String {
        format!("{}{}", children_prefix(volume_id, parent_id), name)
    }

    /// Prefix shared by every extended attribute of one entry.
    pub fn xattr_prefix(volume_id: VolumeId, file_id: FileId) -> String {
        format!("{}:", entry(volume_id, file_id))
    }

    pub fn xattr(volume_id: VolumeId, file_id: FileId, name: &str) -> String {
        format!("{}{}", xattr_prefix(volume_id, file_id), name)
    }

    pub fn children_counter(volume_id: VolumeId, file_id: FileId) -> String {
        format!("{}-{}-children", volume_id, file_id)
    }

    pub fn mtime_tracker(volume_id: VolumeId, file_id: FileId) -> String {
        format!("{}-{}-mtime", volume_id, file_id)
    }

    pub fn file_count(volume_id: VolumeId) -> String {
        format!("{}-file_count", volume_id)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Catalog<'a> {
    state: &'a State,
}

impl<'a> Catalog<'a> {
    pub fn new(state: &'a State) -> Self {
        Self { state }
    }

    async fn record<T>(&self, cache_key: CacheKey, table: Table, key: String) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send,
    {
        let store = self.state.store();
        self.state
            .cache()
            .read_through(&cache_key, || async move {
                Ok(store.get_record::<T>(table, &key).await?)
            })
            .await
    }

    async fn id_by_name(&self, cache_key: CacheKey, table: Table, name: &str) -> Result<Option<u64>> {
        self.record(cache_key, table, name.to_string()).await
    }

    pub async fn volume(&self, volume_id: VolumeId) -> Result<Option<Volume>> {
        self.record(
            CacheKey::Volume(volume_id),
            Table::Volumes,
            keys::id(volume_id),
        )
        .await
    }

    pub async fn volume_by_name(&self, name: &str) -> Result<Option<Volume>> {
        match self
            .id_by_name(CacheKey::VolumeName(name.to_string()), Table::VolumeNames, name)
            .await?
        {
            Some(id) => self.volume(id).await,
            None => Ok(None),
        }
    }

    pub async fn gateway(&self, gateway_id: GatewayId) -> Result<Option<Gateway>> {
        self.record(
            CacheKey::Gateway(gateway_id),
            Table::Gateways,
            keys::id(gateway_id),
        )
        .await
    }

    pub async fn gateway_by_name(&self, name: &str) -> Result<Option<Gateway>> {
        match self
            .id_by_name(CacheKey::GatewayName(name.to_string()), Table::GatewayNames, name)
            .await?
        {
            Some(id) => self.gateway(id).await,
            None => Ok(None),
        }
    }

    pub async fn user(&self, owner_id: OwnerId) -> Result<Option<User>> {
        self.record(CacheKey::User(owner_id), Table::Users, keys::id(owner_id))
            .await
    }

    pub async fn user_by_name(&self, username: &str) -> Result<Option<User>> {
        match self
            .id_by_name(CacheKey::UserName(username.to_string()), Table::UserNames, username)
            .await?
        {
            Some(id) => self.user(id).await,
            None => Ok(None),
        }
    }

    pub async fn cert_bundle(&self, volume_id: VolumeId) -> Result<Option<VolumeCertBundle>> {
        self.record(
            CacheKey::CertBundle(volume_id),
            Table::CertBundles,
            keys::id(volume_id),
        )
        .await
    }

    /// Number of entries in the volume, root included.
    pub async fn file_count(&self, volume_id: VolumeId) -> Result<i64> {
        self.state.shards().count(&keys::file_count(volume_id)).await
    }

    /// Allocate the next id from the named sequence, starting at 1.
    pub async fn next_id(&self, sequence: &str) -> Result<u64> {
        let next: Option<u64> = self
            .state
            .store()
            .update_record(Table::Counters, sequence, |current: Option<u64>| {
                Some(current.unwrap_or(0) + 1)
            })
            .await?;
        Ok(next.unwrap_or(1))
    }
}
