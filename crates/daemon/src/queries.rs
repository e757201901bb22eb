//! Read-only metadata queries besides resolve: one entry's attributes, a
//! child by name, a page of a directory, and extended attributes.
//!
//! Each answers with a volume-signed reply. Business rejections go in the
//! reply's `error` field; anything else fails the request.

use common::entry::FileId;
use common::messages::{ListdirReply, Listing, ReplyError, ResolveReply, XattrReply};
use common::signed::Signed;
use common::volume::Volume;

use crate::entry_store::permissions::can_read;
use crate::entry_store::Identity;
use crate::error::{Error, Result};
use crate::resolve::{sign_resolve, volume_versions, ResolveQuery};
use crate::service_state::State;

/// Like resolve, but a directory's children are never listed.
pub async fn getattr(
    state: &State,
    identity: Identity,
    volume: &Volume,
    query: ResolveQuery,
) -> Result<ResolveReply> {
    let found = state.entries().lookup(volume.volume_id, query.file_id).await?;
    let (error, listing) = match found {
        None => (Some(ReplyError::NotFound), Listing::none()),
        Some(entry) if !can_read(&entry, identity.owner_id) => {
            (Some(ReplyError::PermissionDenied), Listing::none())
        }
        Some(entry) if entry.matches(query.file_version, query.write_nonce) => {
            (None, Listing::not_modified(entry.ftype))
        }
        Some(entry) => (None, Listing::new_entries(entry.ftype, vec![entry])),
    };
    sign_resolve(volume, query.file_id, error, listing)
}

/// The child called `name` of `parent_id`, as a one-entry listing.
pub async fn getchild(
    state: &State,
    identity: Identity,
    volume: &Volume,
    parent_id: FileId,
    name: &str,
) -> Result<ResolveReply> {
    let found = state
        .entries()
        .child(identity, volume.volume_id, parent_id, name)
        .await;
    let (error, listing) = match Error::rejection(found)? {
        Ok(entry) => (None, Listing::new_entries(entry.ftype, vec![entry])),
        Err(code) => (Some(code), Listing::none()),
    };
    tracing::debug!(
        volume_id = volume.volume_id,
        parent_id = %format!("{:x}", parent_id),
        name,
        error = ?error,
        "getchild"
    );
    sign_resolve(volume, parent_id, error, listing)
}

pub async fn listdir(
    state: &State,
    identity: Identity,
    volume: &Volume,
    dir_id: FileId,
    page_id: u32,
) -> Result<ListdirReply> {
    let page = state
        .entries()
        .list_page(identity, volume.volume_id, dir_id, page_id)
        .await;
    let (error, entries, next_page_id) = match Error::rejection(page)? {
        Ok((entries, next)) => (None, entries, next),
        Err(code) => (Some(code), Vec::new(), None),
    };

    ListdirReply {
        volume_id: volume.volume_id,
        file_id: dir_id,
        versions: volume_versions(volume),
        error,
        page_id,
        entries,
        next_page_id,
        signature: Vec::new(),
    }
    .signed_with(&volume.signing_key)
    .map_err(Error::signing)
}

pub async fn getxattr(
    state: &State,
    identity: Identity,
    volume: &Volume,
    file_id: FileId,
    name: &str,
) -> Result<XattrReply> {
    let found = state
        .entries()
        .get_xattr(identity, volume.volume_id, file_id, name)
        .await;
    let (error, value) = match Error::rejection(found)? {
        Ok(value) => (None, Some(value)),
        Err(code) => (Some(code), None),
    };
    sign_xattr(volume, file_id, error, value, Vec::new())
}

pub async fn listxattr(
    state: &State,
    identity: Identity,
    volume: &Volume,
    file_id: FileId,
) -> Result<XattrReply> {
    let found = state
        .entries()
        .list_xattrs(identity, volume.volume_id, file_id)
        .await;
    let (error, names) = match Error::rejection(found)? {
        Ok(names) => (None, names),
        Err(code) => (Some(code), Vec::new()),
    };
    sign_xattr(volume, file_id, error, None, names)
}

fn sign_xattr(
    volume: &Volume,
    file_id: FileId,
    error: Option<ReplyError>,
    value: Option<Vec<u8>>,
    names: Vec<String>,
) -> Result<XattrReply> {
    XattrReply {
        volume_id: volume.volume_id,
        file_id,
        versions: volume_versions(volume),
        error,
        value,
        names,
        signature: Vec::new(),
    }
    .signed_with(&volume.signing_key)
    .map_err(Error::signing)
}
