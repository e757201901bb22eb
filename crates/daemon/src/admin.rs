//! Administrative operations on users, volumes and gateways.
//!
//! Every mutation of a volume or gateway invalidates the cached record and
//! the volume's cert bundle. Changes to the set of gateways re-version and
//! re-sign the bundle, then stamp the new bundle version into the volume.

use common::caps::Capabilities;
use common::crypto::{PublicKey, SecretKey};
use common::entry::ROOT_FILE_ID;
use common::gateway::{Gateway, GatewayCert, GatewayId, GatewayType, VolumeCertBundle};
use common::signed::{EnvelopeError, Signed};
use common::user::{OwnerId, User};
use common::volume::{Volume, VolumeId};
use metadata_store::{StoreExt, Table, Write};

use crate::cache_layer::CacheKey;
use crate::catalog::keys;
use crate::entry_store::EntryStore;
use crate::error::{Error, Result};
use crate::service_state::State;

const USER_SEQUENCE: &str = "users";
const VOLUME_SEQUENCE: &str = "volumes";
const GATEWAY_SEQUENCE: &str = "gateways";

#[derive(Debug, Clone)]
pub struct NewVolume {
    pub name: String,
    pub description: String,
    pub allow_anon: bool,
    /// Shard count for the volume's root aggregates. `None` uses the
    /// service default.
    pub num_shards: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct VolumeChanges {
    pub description: Option<String>,
    pub allow_anon: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct NewGateway {
    pub volume_id: VolumeId,
    pub owner_id: OwnerId,
    pub name: String,
    pub gateway_type: GatewayType,
    pub public_key: PublicKey,
    pub caps: Capabilities,
    pub sealed_private_key: Option<Vec<u8>>,
}

fn require_owner_or_admin(actor: &User, owner_id: OwnerId, what: &str) -> Result<()> {
    if actor.is_admin || actor.owner_id == owner_id {
        return Ok(());
    }
    Err(Error::Forbidden(format!(
        "{} may not administer {}",
        actor.username, what
    )))
}

pub async fn create_user(
    state: &State,
    username: &str,
    public_key: PublicKey,
    is_admin: bool,
) -> Result<User> {
    if username.is_empty() {
        return Err(Error::malformed("empty username"));
    }
    let owner_id = state.catalog().next_id(USER_SEQUENCE).await?;
    let store = state.store();
    if !store
        .insert_record_if_absent(Table::UserNames, username, &owner_id)
        .await?
    {
        return Err(Error::Conflict(format!("user {} exists", username)));
    }

    let user = User {
        owner_id,
        username: username.to_string(),
        public_key,
        is_admin,
    };
    store
        .put_record(Table::Users, &keys::id(owner_id), &user)
        .await?;
    state
        .cache()
        .invalidate(&CacheKey::UserName(username.to_string()))
        .await;

    tracing::info!(owner_id, username, is_admin, "user created");
    Ok(user)
}

/// Create a volume owned by `actor`, with its root directory and an empty
/// cert bundle.
pub async fn create_volume(state: &State, actor: &User, new: NewVolume) -> Result<Volume> {
    if new.name.is_empty() {
        return Err(Error::malformed("empty volume name"));
    }
    let volume_id = state.catalog().next_id(VOLUME_SEQUENCE).await?;
    let store = state.store();
    if !store
        .insert_record_if_absent(Table::VolumeNames, &new.name, &volume_id)
        .await?
    {
        return Err(Error::Conflict(format!("volume {} exists", new.name)));
    }

    let volume = Volume {
        volume_id,
        name: new.name,
        description: new.description,
        owner_id: actor.owner_id,
        version: 1,
        ug_version: 1,
        rg_version: 1,
        cert_version: 1,
        allow_anon: new.allow_anon,
        num_shards: new
            .num_shards
            .unwrap_or(state.config().default_num_shards)
            .max(1),
        signing_key: SecretKey::generate(),
    };
    let root = EntryStore::root_entry(volume_id, actor.owner_id);
    let bundle = VolumeCertBundle::empty(volume_id)
        .signed_with(&volume.signing_key)
        .map_err(Error::signing)?;

    store
        .transact(vec![
            Write::put(Table::Volumes, keys::id(volume_id), &volume)?,
            Write::put(Table::Entries, keys::entry(volume_id, ROOT_FILE_ID), &root)?,
            Write::put(Table::CertBundles, keys::id(volume_id), &bundle)?,
        ])
        .await?;

    let shards = state.shards();
    for name in [
        keys::children_counter(volume_id, ROOT_FILE_ID),
        keys::mtime_tracker(volume_id, ROOT_FILE_ID),
        keys::file_count(volume_id),
    ] {
        shards.increase_shards(&name, volume.num_shards).await?;
    }
    shards.increment(&keys::file_count(volume_id), 1).await?;
    state
        .cache()
        .invalidate(&CacheKey::VolumeName(volume.name.clone()))
        .await;

    tracing::info!(volume_id, name = %volume.name, owner_id = actor.owner_id, "volume created");
    Ok(volume)
}

pub async fn update_volume(
    state: &State,
    actor: &User,
    volume_id: VolumeId,
    changes: VolumeChanges,
) -> Result<Volume> {
    let current = state
        .catalog()
        .volume(volume_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("volume {}", volume_id)))?;
    require_owner_or_admin(actor, current.owner_id, "this volume")?;

    let updated: Option<Volume> = state
        .store()
        .update_record(Table::Volumes, &keys::id(volume_id), move |v: Option<Volume>| {
            v.map(|mut v| {
                if let Some(description) = changes.description {
                    v.description = description;
                }
                if let Some(allow_anon) = changes.allow_anon {
                    v.allow_anon = allow_anon;
                }
                v.version += 1;
                v
            })
        })
        .await?;
    state.cache().invalidate_volume(volume_id).await;
    updated.ok_or_else(|| Error::NotFound(format!("volume {}", volume_id)))
}

/// Issue a volume-signed cert for a new gateway and add it to the bundle.
pub async fn create_gateway(state: &State, actor: &User, new: NewGateway) -> Result<Gateway> {
    let catalog = state.catalog();
    let volume = catalog
        .volume(new.volume_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("volume {}", new.volume_id)))?;
    if !actor.is_admin && (actor.owner_id != volume.owner_id || actor.owner_id != new.owner_id) {
        return Err(Error::Forbidden(format!(
            "{} may not add gateways to {}",
            actor.username, volume.name
        )));
    }
    catalog
        .user(new.owner_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("user {}", new.owner_id)))?;
    if new.name.is_empty() {
        return Err(Error::malformed("empty gateway name"));
    }

    let gateway_id = catalog.next_id(GATEWAY_SEQUENCE).await?;
    let store = state.store();
    if !store
        .insert_record_if_absent(Table::GatewayNames, &new.name, &gateway_id)
        .await?
    {
        return Err(Error::Conflict(format!("gateway {} exists", new.name)));
    }

    let cert = GatewayCert {
        gateway_id,
        gateway_type: new.gateway_type,
        volume_id: volume.volume_id,
        owner_id: new.owner_id,
        name: new.name,
        public_key: new.public_key,
        caps: new.caps,
        cert_version: 1,
        signature: Vec::new(),
    }
    .signed_with(&volume.signing_key)
    .map_err(Error::signing)?;
    let gateway = Gateway {
        cert,
        session: None,
        sealed_private_key: new.sealed_private_key,
    };
    store
        .put_record(Table::Gateways, &keys::id(gateway_id), &gateway)
        .await?;

    let cert = gateway.cert.clone();
    reissue_bundle(state, &volume, gateway.gateway_type(), move |bundle| {
        bundle.upsert(&cert)
    })
    .await?;
    state
        .cache()
        .invalidate_many(&[
            CacheKey::Gateway(gateway_id),
            CacheKey::GatewayName(gateway.cert.name.clone()),
        ])
        .await;

    tracing::info!(
        gateway_id,
        volume_id = volume.volume_id,
        gateway_type = %gateway.gateway_type(),
        "gateway created"
    );
    Ok(gateway)
}

/// Replace a gateway's capabilities. The cert is re-signed under a new
/// cert version.
pub async fn set_gateway_caps(
    state: &State,
    actor: &User,
    gateway_id: GatewayId,
    caps: Capabilities,
) -> Result<Gateway> {
    let (gateway, volume) = gateway_and_volume(state, gateway_id).await?;
    require_owner_or_admin(actor, volume.owner_id, "this volume")?;

    let mut signing_error: Option<EnvelopeError> = None;
    let signing_key = &volume.signing_key;
    let updated: Option<Gateway> = state
        .store()
        .update_record(Table::Gateways, &keys::id(gateway_id), |g: Option<Gateway>| {
            let mut g = g?;
            g.cert.caps = caps;
            g.cert.cert_version += 1;
            if let Err(e) = g.cert.sign_with(signing_key) {
                signing_error = Some(e);
                return None;
            }
            Some(g)
        })
        .await?;
    if let Some(e) = signing_error {
        return Err(Error::signing(e));
    }
    let updated = updated.ok_or_else(|| Error::NotFound(format!("gateway {}", gateway_id)))?;

    let cert = updated.cert.clone();
    reissue_bundle(state, &volume, gateway.gateway_type(), move |bundle| {
        bundle.upsert(&cert)
    })
    .await?;
    state
        .cache()
        .invalidate(&CacheKey::Gateway(gateway_id))
        .await;

    tracing::info!(gateway_id, caps = ?caps, "gateway capabilities changed");
    Ok(updated)
}

pub async fn delete_gateway(state: &State, actor: &User, gateway_id: GatewayId) -> Result<()> {
    let (gateway, volume) = gateway_and_volume(state, gateway_id).await?;
    require_owner_or_admin(actor, volume.owner_id, "this volume")?;

    state
        .store()
        .transact(vec![
            Write::delete(Table::Gateways, keys::id(gateway_id)),
            Write::delete(Table::GatewayNames, gateway.cert.name.clone()),
        ])
        .await?;
    reissue_bundle(state, &volume, gateway.gateway_type(), move |bundle| {
        bundle.remove(gateway_id)
    })
    .await?;
    state
        .cache()
        .invalidate_many(&[
            CacheKey::Gateway(gateway_id),
            CacheKey::GatewayName(gateway.cert.name.clone()),
        ])
        .await;

    tracing::info!(gateway_id, volume_id = volume.volume_id, "gateway deleted");
    Ok(())
}

async fn gateway_and_volume(state: &State, gateway_id: GatewayId) -> Result<(Gateway, Volume)> {
    let catalog = state.catalog();
    let gateway = catalog
        .gateway(gateway_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("gateway {}", gateway_id)))?;
    let volume = catalog
        .volume(gateway.volume_id())
        .await?
        .ok_or_else(|| Error::NotFound(format!("volume {}", gateway.volume_id())))?;
    Ok((gateway, volume))
}

/// Apply `edit` to the volume's bundle, bump and re-sign it, then record the
/// new bundle version and the per-type gateway version in the volume.
async fn reissue_bundle<F>(
    state: &State,
    volume: &Volume,
    gateway_type: GatewayType,
    edit: F,
) -> Result<Volume>
where
    F: FnOnce(&mut VolumeCertBundle) + Send,
{
    let volume_id = volume.volume_id;
    let signing_key = &volume.signing_key;
    let mut signing_error: Option<EnvelopeError> = None;

    let bundle: Option<VolumeCertBundle> = state
        .store()
        .update_record(
            Table::CertBundles,
            &keys::id(volume_id),
            |current: Option<VolumeCertBundle>| {
                let mut bundle = current.unwrap_or_else(|| VolumeCertBundle::empty(volume_id));
                edit(&mut bundle);
                bundle.version += 1;
                if let Err(e) = bundle.sign_with(signing_key) {
                    signing_error = Some(e);
                    return None;
                }
                Some(bundle)
            },
        )
        .await?;
    if let Some(e) = signing_error {
        return Err(Error::signing(e));
    }
    let cert_version = bundle.map(|b| b.version).unwrap_or(volume.cert_version);

    let updated: Option<Volume> = state
        .store()
        .update_record(Table::Volumes, &keys::id(volume_id), move |v: Option<Volume>| {
            v.map(|mut v| {
                v.cert_version = cert_version;
                match gateway_type {
                    GatewayType::User => v.ug_version += 1,
                    GatewayType::Replica => v.rg_version += 1,
                    GatewayType::Acquisition => {}
                }
                v
            })
        })
        .await?;
    state.cache().invalidate_volume(volume_id).await;
    updated.ok_or_else(|| Error::NotFound(format!("volume {}", volume_id)))
}
