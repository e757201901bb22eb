//! Resolve: tell a caller whether its cached copy of an entry is stale.

use common::entry::{Entry, EntryType, FileId};
use common::messages::{Listing, ReplyError, ResolveReply, VolumeVersions};
use common::signed::Signed;
use common::volume::Volume;

use crate::entry_store::permissions::can_read;
use crate::entry_store::Identity;
use crate::error::{Error, Result};
use crate::service_state::State;

/// The caller's cached `(version, write_nonce)` of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveQuery {
    pub file_id: FileId,
    pub file_version: i64,
    pub write_nonce: i64,
}

pub fn volume_versions(volume: &Volume) -> VolumeVersions {
    VolumeVersions {
        volume_version: volume.version,
        ug_version: volume.ug_version,
        rg_version: volume.rg_version,
        cert_version: volume.cert_version,
    }
}

/// Build the volume-signed reply. Missing and unreadable entries are
/// answered in the reply's `error` field with an empty listing.
pub async fn resolve(
    state: &State,
    identity: Identity,
    volume: &Volume,
    query: ResolveQuery,
) -> Result<ResolveReply> {
    let found = state.entries().lookup(volume.volume_id, query.file_id).await?;
    answer(state, identity, volume, query, found).await
}

/// Reply for `found`, the entry as looked up for `query`. The entry may be
/// gone by the time its children are listed; that is answered in the reply
/// too.
pub(crate) async fn answer(
    state: &State,
    identity: Identity,
    volume: &Volume,
    query: ResolveQuery,
    found: Option<Entry>,
) -> Result<ResolveReply> {
    let (error, listing) = match found {
        None => (Some(ReplyError::NotFound), Listing::none()),
        Some(entry) if !can_read(&entry, identity.owner_id) => {
            (Some(ReplyError::PermissionDenied), Listing::none())
        }
        Some(entry) if entry.matches(query.file_version, query.write_nonce) => {
            (None, Listing::not_modified(entry.ftype))
        }
        Some(entry) if entry.is_dir() => {
            let children = state.entries().children_of(identity, &entry).await;
            match Error::rejection(children)? {
                Ok(children) => {
                    let mut entries = vec![entry];
                    entries.extend(children);
                    (None, Listing::new_entries(EntryType::Dir, entries))
                }
                Err(code) => (Some(code), Listing::none()),
            }
        }
        Some(entry) => (None, Listing::new_entries(entry.ftype, vec![entry])),
    };

    tracing::debug!(
        volume_id = volume.volume_id,
        file_id = %format!("{:x}", query.file_id),
        status = ?listing.status,
        error = ?error,
        "resolved"
    );

    sign_resolve(volume, query.file_id, error, listing)
}

pub(crate) fn sign_resolve(
    volume: &Volume,
    file_id: FileId,
    error: Option<ReplyError>,
    listing: Listing,
) -> Result<ResolveReply> {
    ResolveReply {
        volume_id: volume.volume_id,
        file_id,
        versions: volume_versions(volume),
        error,
        listing,
        signature: Vec::new(),
    }
    .signed_with(&volume.signing_key)
    .map_err(Error::signing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::{self, NewVolume};
    use crate::service_config::Config;
    use common::crypto::SecretKey;
    use common::entry::ROOT_FILE_ID;
    use common::messages::{ListingStatus, NewEntry};

    async fn world() -> (State, Volume, Identity) {
        let state = State::ephemeral(Config::default());
        let user = admin::create_user(&state, "alice", SecretKey::generate().public(), false)
            .await
            .unwrap();
        let volume = admin::create_volume(
            &state,
            &user,
            NewVolume {
                name: "v".to_string(),
                description: String::new(),
                allow_anon: true,
                num_shards: None,
            },
        )
        .await
        .unwrap();
        (state, volume, Identity::gateway(user.owner_id, 7))
    }

    fn query(file_id: FileId, file_version: i64, write_nonce: i64) -> ResolveQuery {
        ResolveQuery {
            file_id,
            file_version,
            write_nonce,
        }
    }

    #[tokio::test]
    async fn test_new_then_not_modified() {
        let (state, volume, me) = world().await;
        let reply = resolve(&state, me, &volume, query(ROOT_FILE_ID, 0, 0))
            .await
            .unwrap();
        reply.verify_with(&volume.public_key()).unwrap();
        assert_eq!(reply.error, None);
        assert_eq!(reply.listing.status, ListingStatus::New);
        assert_eq!(reply.listing.ftype, Some(EntryType::Dir));
        assert_eq!(reply.versions.volume_version, volume.version);
        let root = reply.listing.entries[0].clone();

        let again = resolve(
            &state,
            me,
            &volume,
            query(ROOT_FILE_ID, root.version, root.write_nonce),
        )
        .await
        .unwrap();
        assert_eq!(again.listing.status, ListingStatus::NotModified);
        assert!(again.listing.entries.is_empty());
    }

    #[tokio::test]
    async fn test_child_change_marks_directory_new() {
        let (state, volume, me) = world().await;
        let first = resolve(&state, me, &volume, query(ROOT_FILE_ID, 0, 0))
            .await
            .unwrap();
        let root = first.listing.entries[0].clone();

        state
            .entries()
            .create(
                me,
                volume.volume_id,
                NewEntry {
                    parent_id: ROOT_FILE_ID,
                    name: "a".to_string(),
                    ftype: EntryType::File,
                    mode: 0o644,
                    size: 1,
                },
            )
            .await
            .unwrap();

        let reply = resolve(
            &state,
            me,
            &volume,
            query(ROOT_FILE_ID, root.version, root.write_nonce),
        )
        .await
        .unwrap();
        assert_eq!(reply.listing.status, ListingStatus::New);
        let names: Vec<_> = reply.listing.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["/", "a"]);
        assert_eq!(reply.listing.entries[0].num_children, 1);
    }

    #[tokio::test]
    async fn test_missing_and_denied_leak_nothing() {
        let (state, volume, me) = world().await;
        let missing = resolve(&state, me, &volume, query(0xdead, 0, 0))
            .await
            .unwrap();
        assert_eq!(missing.error, Some(ReplyError::NotFound));
        assert_eq!(missing.listing, Listing::none());

        let secret = state
            .entries()
            .create(
                me,
                volume.volume_id,
                NewEntry {
                    parent_id: ROOT_FILE_ID,
                    name: "secret".to_string(),
                    ftype: EntryType::File,
                    mode: 0o600,
                    size: 1,
                },
            )
            .await
            .unwrap();
        let denied = resolve(
            &state,
            Identity::anonymous(),
            &volume,
            query(secret.file_id, 0, 0),
        )
        .await
        .unwrap();
        assert_eq!(denied.error, Some(ReplyError::PermissionDenied));
        assert_eq!(denied.listing, Listing::none());
        denied.verify_with(&volume.public_key()).unwrap();
    }

    #[tokio::test]
    async fn test_directory_removed_while_resolving() {
        let (state, volume, me) = world().await;
        let dir = state
            .entries()
            .create(
                me,
                volume.volume_id,
                NewEntry {
                    parent_id: ROOT_FILE_ID,
                    name: "d".to_string(),
                    ftype: EntryType::Dir,
                    mode: 0o755,
                    size: 0,
                },
            )
            .await
            .unwrap();
        let found = state
            .entries()
            .lookup(volume.volume_id, dir.file_id)
            .await
            .unwrap();
        state
            .entries()
            .delete(me, volume.volume_id, dir.file_id)
            .await
            .unwrap();

        let reply = answer(&state, me, &volume, query(dir.file_id, 0, 0), found)
            .await
            .unwrap();
        reply.verify_with(&volume.public_key()).unwrap();
        assert_eq!(reply.error, None);
        assert_eq!(reply.listing.status, ListingStatus::New);
        assert_eq!(reply.listing.entries.len(), 1);
        assert_eq!(reply.listing.entries[0].file_id, dir.file_id);
    }

    #[tokio::test]
    async fn test_resolve_runs_on_a_spawned_task() {
        let (state, volume, me) = world().await;
        for name in ["a", "b"] {
            state
                .entries()
                .create(
                    me,
                    volume.volume_id,
                    NewEntry {
                        parent_id: ROOT_FILE_ID,
                        name: name.to_string(),
                        ftype: EntryType::File,
                        mode: 0o644,
                        size: 0,
                    },
                )
                .await
                .unwrap();
        }

        // Handlers run as spawned tasks, so the future must be Send + 'static.
        let reply = tokio::spawn(async move {
            resolve(&state, me, &volume, query(ROOT_FILE_ID, 0, 0)).await
        })
        .await
        .unwrap()
        .unwrap();
        assert_eq!(reply.listing.entries.len(), 3);
    }
}
