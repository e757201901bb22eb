//! Extended attributes: small named values attached to one entry.
//!
//! Attributes are stored beside the entry record and removed with it.
//! Reading or listing needs read access to the entry, changing them needs
//! write access. They do not change the entry's write nonce.

use common::entry::{Entry, FileId};
use common::messages::{ReplyError, XattrMode};
use common::volume::VolumeId;
use metadata_store::{StoreExt, Table};

use super::permissions::{can_read, can_write};
use super::{rejected, EntryStore, Identity};
use crate::catalog::keys;
use crate::error::Result;

pub const MAX_XATTR_NAME_LEN: usize = 255;
pub const MAX_XATTR_VALUE_LEN: usize = 65_536;

fn validate_xattr_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_XATTR_NAME_LEN || name.contains('\0') {
        return Err(rejected(ReplyError::Invalid));
    }
    Ok(())
}

impl EntryStore<'_> {
    async fn readable_entry(
        &self,
        identity: Identity,
        volume_id: VolumeId,
        file_id: FileId,
    ) -> Result<Entry> {
        let entry = self
            .record(volume_id, file_id)
            .await?
            .ok_or(rejected(ReplyError::NotFound))?;
        if !can_read(&entry, identity.owner_id) {
            return Err(rejected(ReplyError::NotFound));
        }
        Ok(entry)
    }

    async fn writable_entry(
        &self,
        identity: Identity,
        volume_id: VolumeId,
        file_id: FileId,
    ) -> Result<Entry> {
        let entry = self
            .record(volume_id, file_id)
            .await?
            .ok_or(rejected(ReplyError::NotFound))?;
        if !can_write(&entry, identity.owner_id) {
            // Hide entries the caller cannot even see.
            let code = if can_read(&entry, identity.owner_id) {
                ReplyError::PermissionDenied
            } else {
                ReplyError::NotFound
            };
            return Err(rejected(code));
        }
        Ok(entry)
    }

    pub async fn get_xattr(
        &self,
        identity: Identity,
        volume_id: VolumeId,
        file_id: FileId,
        name: &str,
    ) -> Result<Vec<u8>> {
        validate_xattr_name(name)?;
        self.readable_entry(identity, volume_id, file_id).await?;
        self.state
            .store()
            .get_record::<Vec<u8>>(Table::Xattrs, &keys::xattr(volume_id, file_id, name))
            .await?
            .ok_or(rejected(ReplyError::NotFound))
    }

    /// Attribute names of an entry, in key order.
    pub async fn list_xattrs(
        &self,
        identity: Identity,
        volume_id: VolumeId,
        file_id: FileId,
    ) -> Result<Vec<String>> {
        self.readable_entry(identity, volume_id, file_id).await?;
        let prefix = keys::xattr_prefix(volume_id, file_id);
        let found = self
            .state
            .store()
            .scan_prefix(Table::Xattrs, &prefix)
            .await?;
        Ok(found
            .into_iter()
            .filter_map(|(key, _)| key.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    pub async fn set_xattr(
        &self,
        identity: Identity,
        volume_id: VolumeId,
        file_id: FileId,
        name: &str,
        value: Vec<u8>,
        mode: XattrMode,
    ) -> Result<()> {
        validate_xattr_name(name)?;
        if value.len() > MAX_XATTR_VALUE_LEN {
            return Err(rejected(ReplyError::Invalid));
        }
        self.writable_entry(identity, volume_id, file_id).await?;

        let store = self.state.store();
        let key = keys::xattr(volume_id, file_id, name);
        match mode {
            XattrMode::Any => store.put_record(Table::Xattrs, &key, &value).await?,
            XattrMode::Create => {
                if !store.insert_record_if_absent(Table::Xattrs, &key, &value).await? {
                    return Err(rejected(ReplyError::AlreadyExists));
                }
            }
            XattrMode::Replace => {
                let mut existed = false;
                store
                    .update_record(Table::Xattrs, &key, |current: Option<Vec<u8>>| {
                        existed = current.is_some();
                        current.map(|_| value)
                    })
                    .await?;
                if !existed {
                    return Err(rejected(ReplyError::NotFound));
                }
            }
        }

        // The entry may have gone while the attribute was written.
        if self.record(volume_id, file_id).await?.is_none() {
            store.delete(Table::Xattrs, &key).await?;
            return Err(rejected(ReplyError::NotFound));
        }
        tracing::debug!(volume_id, file_id = %format!("{:x}", file_id), name, "xattr set");
        Ok(())
    }

    pub async fn remove_xattr(
        &self,
        identity: Identity,
        volume_id: VolumeId,
        file_id: FileId,
        name: &str,
    ) -> Result<()> {
        validate_xattr_name(name)?;
        self.writable_entry(identity, volume_id, file_id).await?;
        let removed = self
            .state
            .store()
            .delete(Table::Xattrs, &keys::xattr(volume_id, file_id, name))
            .await?;
        if !removed {
            return Err(rejected(ReplyError::NotFound));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::entry::{EntryType, ROOT_FILE_ID};
    use common::messages::NewEntry;
    use common::user::OwnerId;

    use super::*;
    use crate::error::Error;
    use crate::service_config::Config;
    use crate::service_state::State;

    const VOLUME: VolumeId = 1;
    const OWNER: OwnerId = 10;
    const OTHER: OwnerId = 20;

    fn owner() -> Identity {
        Identity::gateway(OWNER, 100)
    }

    async fn with_file(mode: u32) -> (State, FileId) {
        let state = State::ephemeral(Config::default());
        let root = EntryStore::root_entry(VOLUME, OWNER);
        state
            .store()
            .put_record(Table::Entries, &keys::entry(VOLUME, ROOT_FILE_ID), &root)
            .await
            .unwrap();
        let file = state
            .entries()
            .create(
                owner(),
                VOLUME,
                NewEntry {
                    parent_id: ROOT_FILE_ID,
                    name: "f".to_string(),
                    ftype: EntryType::File,
                    mode,
                    size: 0,
                },
            )
            .await
            .unwrap();
        (state, file.file_id)
    }

    fn code(result: Result<impl std::fmt::Debug>) -> ReplyError {
        match result {
            Err(Error::Rejected(code)) => code,
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_set_get_list_remove() {
        let (state, file_id) = with_file(0o644).await;
        let entries = state.entries();
        for (name, value) in [("user.b", b"two".to_vec()), ("user.a", b"one".to_vec())] {
            entries
                .set_xattr(owner(), VOLUME, file_id, name, value, XattrMode::Any)
                .await
                .unwrap();
        }

        let value = entries
            .get_xattr(owner(), VOLUME, file_id, "user.a")
            .await
            .unwrap();
        assert_eq!(value, b"one");
        let names = entries.list_xattrs(owner(), VOLUME, file_id).await.unwrap();
        assert_eq!(names, vec!["user.a", "user.b"]);

        entries
            .remove_xattr(owner(), VOLUME, file_id, "user.a")
            .await
            .unwrap();
        assert_eq!(
            code(entries.get_xattr(owner(), VOLUME, file_id, "user.a").await),
            ReplyError::NotFound
        );
        assert_eq!(
            code(entries.remove_xattr(owner(), VOLUME, file_id, "user.a").await),
            ReplyError::NotFound
        );
    }

    #[tokio::test]
    async fn test_create_and_replace_modes() {
        let (state, file_id) = with_file(0o644).await;
        let entries = state.entries();
        let set = |value: &[u8], mode| {
            entries.set_xattr(owner(), VOLUME, file_id, "k", value.to_vec(), mode)
        };

        assert_eq!(code(set(b"x", XattrMode::Replace).await), ReplyError::NotFound);
        set(b"first", XattrMode::Create).await.unwrap();
        assert_eq!(code(set(b"y", XattrMode::Create).await), ReplyError::AlreadyExists);
        set(b"second", XattrMode::Replace).await.unwrap();

        let value = entries.get_xattr(owner(), VOLUME, file_id, "k").await.unwrap();
        assert_eq!(value, b"second");
    }

    #[tokio::test]
    async fn test_xattr_permissions() {
        let (state, file_id) = with_file(0o644).await;
        let entries = state.entries();
        entries
            .set_xattr(owner(), VOLUME, file_id, "k", b"v".to_vec(), XattrMode::Any)
            .await
            .unwrap();

        let stranger = Identity::gateway(OTHER, 200);
        assert!(entries.get_xattr(stranger, VOLUME, file_id, "k").await.is_ok());
        assert_eq!(
            code(
                entries
                    .set_xattr(stranger, VOLUME, file_id, "k", b"w".to_vec(), XattrMode::Any)
                    .await
            ),
            ReplyError::PermissionDenied
        );

        let (state, private) = with_file(0o600).await;
        let entries = state.entries();
        assert_eq!(
            code(entries.list_xattrs(stranger, VOLUME, private).await),
            ReplyError::NotFound
        );
        assert_eq!(
            code(entries.remove_xattr(stranger, VOLUME, private, "k").await),
            ReplyError::NotFound
        );
    }

    #[tokio::test]
    async fn test_xattr_limits() {
        let (state, file_id) = with_file(0o644).await;
        let entries = state.entries();
        let long_name = "n".repeat(MAX_XATTR_NAME_LEN + 1);
        let big = vec![0u8; MAX_XATTR_VALUE_LEN + 1];

        assert_eq!(
            code(
                entries
                    .set_xattr(owner(), VOLUME, file_id, &long_name, b"v".to_vec(), XattrMode::Any)
                    .await
            ),
            ReplyError::Invalid
        );
        assert_eq!(
            code(
                entries
                    .set_xattr(owner(), VOLUME, file_id, "k", big, XattrMode::Any)
                    .await
            ),
            ReplyError::Invalid
        );
        assert_eq!(
            code(entries.get_xattr(owner(), VOLUME, file_id, "").await),
            ReplyError::Invalid
        );
    }

    #[tokio::test]
    async fn test_delete_drops_xattrs() {
        let (state, file_id) = with_file(0o644).await;
        let entries = state.entries();
        entries
            .set_xattr(owner(), VOLUME, file_id, "k", b"v".to_vec(), XattrMode::Any)
            .await
            .unwrap();
        entries.delete(owner(), VOLUME, file_id).await.unwrap();

        let left = state
            .store()
            .scan_prefix(Table::Xattrs, &keys::xattr_prefix(VOLUME, file_id))
            .await
            .unwrap();
        assert!(left.is_empty());
        assert_eq!(
            code(entries.list_xattrs(owner(), VOLUME, file_id).await),
            ReplyError::NotFound
        );
    }
}
