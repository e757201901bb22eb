//! Per-object metadata records and directory aggregates.
//!
//! A directory's child count and latest child mtime are never written to
//! the directory record. Child creation and removal go through the
//! [`ShardEngine`](crate::sharding::ShardEngine):
//!
//! - `"{volume}-{dir}-children"`: sharded counter of children
//! - `"{volume}-{dir}-mtime"`: sharded max-tracker of child stamps
//!
//! The visible directory merges both into the record: `num_children` is
//! the counter, and if the tracker's stamp is newer than the record's own
//! mtime, its time and nonce replace the record's. Write nonces are derived
//! from the stamp they are minted with, so a directory's visible nonce only
//! moves forward: when its own attributes change, or a child is added,
//! removed or renamed.
//!
//! Names are unique per directory. Each `(volume, parent, name)` owns a
//! name-holder record, which doubles as the directory's children index.
//!
//! Writes that touch several records (create, delete, rename) are
//! committed on a detached task, so a caller that gives up never leaves
//! one half applied. Counts are raised before a child becomes visible and
//! lowered only after it is gone, so they never undercount.

pub mod permissions;
mod xattrs;

pub use xattrs::{MAX_XATTR_NAME_LEN, MAX_XATTR_VALUE_LEN};

use common::entry::{write_nonce_at, Entry, EntryType, FileId, ROOT_FILE_ID};
use common::gateway::GatewayId;
use common::messages::{EntryPatch, NewEntry, ReplyError, RESOLVE_MAX_PAGE_SIZE};
use common::time::Timestamp;
use common::user::OwnerId;
use common::volume::VolumeId;
use metadata_store::{StoreExt, Table, Write};

use crate::cache_layer::CacheKey;
use crate::catalog::keys;
use crate::error::{Error, Result};
use crate::fanout;
use crate::service_state::State;
use crate::sharding::MaxStamp;

use permissions::{can_read, can_write, is_owner};

pub const MAX_NAME_LEN: usize = 255;
pub const DEFAULT_ROOT_MODE: u32 = 0o775;

/// Deepest directory nesting a rename will walk when checking for loops.
const MAX_DEPTH: usize = 4096;

/// Who an entry operation is evaluated for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Identity {
    pub owner_id: Option<OwnerId>,
    pub gateway_id: Option<GatewayId>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn gateway(owner_id: OwnerId, gateway_id: GatewayId) -> Self {
        Self {
            owner_id: Some(owner_id),
            gateway_id: Some(gateway_id),
        }
    }
}

fn rejected(code: ReplyError) -> Error {
    Error::Rejected(code)
}

fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.len() > MAX_NAME_LEN
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\0');
    if bad {
        return Err(rejected(ReplyError::Invalid));
    }
    Ok(())
}

/// Stamp `entry` with `mtime` and the nonce derived from it.
fn touch(entry: &mut Entry, mtime: Timestamp) {
    entry.mtime = mtime;
    entry.write_nonce = write_nonce_at(mtime);
}

#[derive(Debug, Clone, Copy)]
pub struct EntryStore<'a> {
    state: &'a State,
}

impl<'a> EntryStore<'a> {
    pub fn new(state: &'a State) -> Self {
        Self { state }
    }

    /// The root directory record of a fresh volume.
    pub fn root_entry(volume_id: VolumeId, owner_id: OwnerId) -> Entry {
        let now = Timestamp::now();
        Entry {
            volume_id,
            file_id: ROOT_FILE_ID,
            parent_id: ROOT_FILE_ID,
            name: "/".to_string(),
            ftype: EntryType::Dir,
            version: 1,
            write_nonce: write_nonce_at(now),
            owner_id,
            coordinator_id: 0,
            mode: DEFAULT_ROOT_MODE,
            size: 0,
            ctime: now,
            mtime: now,
            num_children: 0,
        }
    }

    /// The persisted record, through the cache.
    pub async fn record(&self, volume_id: VolumeId, file_id: FileId) -> Result<Option<Entry>> {
        let store = self.state.store();
        let key = keys::entry(volume_id, file_id);
        self.state
            .cache()
            .read_through(&CacheKey::Entry(volume_id, file_id), || async move {
                Ok(store.get_record::<Entry>(Table::Entries, &key).await?)
            })
            .await
    }

    /// Merge a directory's aggregates into its record.
    pub async fn visible(&self, mut entry: Entry) -> Result<Entry> {
        if !entry.is_dir() {
            return Ok(entry);
        }
        let shards = self.state.shards();
        let children = keys::children_counter(entry.volume_id, entry.file_id);
        let mtime = keys::mtime_tracker(entry.volume_id, entry.file_id);
        let (num_children, stamp) = fanout::join(
            "directory aggregates",
            self.state.config().fetch_timeout(),
            async { tokio::try_join!(shards.count(&children), shards.max(&mtime)) },
        )
        .await?;

        entry.num_children = num_children;
        if stamp.time > entry.mtime {
            entry.mtime = stamp.time;
            entry.write_nonce = stamp.nonce;
        }
        Ok(entry)
    }

    /// Record plus merged aggregates, no permission check.
    pub async fn lookup(&self, volume_id: VolumeId, file_id: FileId) -> Result<Option<Entry>> {
        match self.record(volume_id, file_id).await? {
            Some(entry) => Ok(Some(self.visible(entry).await?)),
            None => Ok(None),
        }
    }

    pub async fn read(
        &self,
        identity: Identity,
        volume_id: VolumeId,
        file_id: FileId,
    ) -> Result<Entry> {
        let entry = self
            .lookup(volume_id, file_id)
            .await?
            .ok_or(rejected(ReplyError::NotFound))?;
        if !can_read(&entry, identity.owner_id) {
            return Err(rejected(ReplyError::PermissionDenied));
        }
        Ok(entry)
    }

    /// Readable children of a readable directory, ordered by name.
    pub async fn list_children(
        &self,
        identity: Identity,
        volume_id: VolumeId,
        dir_id: FileId,
    ) -> Result<Vec<Entry>> {
        let dir = self.read(identity, volume_id, dir_id).await?;
        self.children_of(identity, &dir).await
    }

    /// Readable children of `dir` as already read by the caller. A
    /// directory removed since then simply has no children left.
    pub async fn children_of(&self, identity: Identity, dir: &Entry) -> Result<Vec<Entry>> {
        if !dir.is_dir() {
            return Err(rejected(ReplyError::Invalid));
        }
        let ids = self.child_ids(dir.volume_id, dir.file_id).await?;
        self.readable(identity, dir.volume_id, ids).await
    }

    /// One page of a readable directory's children, plus the next page id
    /// if more follow. Pages hold at most [`RESOLVE_MAX_PAGE_SIZE`] names.
    pub async fn list_page(
        &self,
        identity: Identity,
        volume_id: VolumeId,
        dir_id: FileId,
        page_id: u32,
    ) -> Result<(Vec<Entry>, Option<u32>)> {
        let dir = self.read(identity, volume_id, dir_id).await?;
        if !dir.is_dir() {
            return Err(rejected(ReplyError::Invalid));
        }
        let page_size = RESOLVE_MAX_PAGE_SIZE as usize;
        let ids = self.child_ids(volume_id, dir_id).await?;
        let start = (page_id as usize).saturating_mul(page_size);
        let more = ids.len() > start.saturating_add(page_size);
        let page: Vec<FileId> = ids.into_iter().skip(start).take(page_size).collect();

        let children = self.readable(identity, volume_id, page).await?;
        Ok((children, more.then(|| page_id.saturating_add(1))))
    }

    /// The child called `name` in a readable directory.
    pub async fn child(
        &self,
        identity: Identity,
        volume_id: VolumeId,
        dir_id: FileId,
        name: &str,
    ) -> Result<Entry> {
        validate_name(name)?;
        let dir = self.read(identity, volume_id, dir_id).await?;
        if !dir.is_dir() {
            return Err(rejected(ReplyError::Invalid));
        }
        let file_id: FileId = self
            .state
            .store()
            .get_record::<FileId>(Table::NameHolders, &keys::name_holder(volume_id, dir_id, name))
            .await?
            .ok_or(rejected(ReplyError::NotFound))?;
        self.read(identity, volume_id, file_id).await
    }

    /// Ids of a directory's children, ordered by name.
    async fn child_ids(&self, volume_id: VolumeId, dir_id: FileId) -> Result<Vec<FileId>> {
        let holders: Vec<(String, FileId)> = self
            .state
            .store()
            .scan_records(Table::NameHolders, &keys::children_prefix(volume_id, dir_id))
            .await?;
        Ok(holders.into_iter().map(|(_, file_id)| file_id).collect())
    }

    /// Look up `ids` together, keeping the ones `identity` may read.
    async fn readable(
        &self,
        identity: Identity,
        volume_id: VolumeId,
        ids: Vec<FileId>,
    ) -> Result<Vec<Entry>> {
        let store = *self;
        let children = fanout::join_all(
            "children listing",
            self.state.config().fetch_timeout(),
            ids.into_iter()
                .map(move |file_id| async move { store.lookup(volume_id, file_id).await }),
        )
        .await?;

        Ok(children
            .into_iter()
            .flatten()
            .filter(|child| can_read(child, identity.owner_id))
            .collect())
    }

    /// Create a file or directory under a writable parent directory.
    pub async fn create(
        &self,
        identity: Identity,
        volume_id: VolumeId,
        new: NewEntry,
    ) -> Result<Entry> {
        validate_name(&new.name)?;
        let owner_id = identity
            .owner_id
            .ok_or(rejected(ReplyError::PermissionDenied))?;

        let parent = self
            .lookup(volume_id, new.parent_id)
            .await?
            .ok_or(rejected(ReplyError::NotFound))?;
        if !parent.is_dir() {
            return Err(rejected(ReplyError::Invalid));
        }
        if !can_write(&parent, identity.owner_id) {
            return Err(rejected(ReplyError::PermissionDenied));
        }

        let now = Timestamp::latest_after(parent.mtime);
        let entry = Entry {
            volume_id,
            file_id: ROOT_FILE_ID,
            parent_id: new.parent_id,
            name: new.name,
            ftype: new.ftype,
            version: 1,
            write_nonce: write_nonce_at(now),
            owner_id,
            coordinator_id: identity.gateway_id.unwrap_or(0),
            mode: new.mode & 0o7777,
            size: new.size,
            ctime: now,
            mtime: now,
            num_children: 0,
        };

        let state = self.state.clone();
        let entry = fanout::detached("create", async move {
            EntryStore::new(&state).commit_create(entry).await
        })
        .await?;

        tracing::debug!(
            volume_id,
            file_id = %format!("{:x}", entry.file_id),
            parent_id = %format!("{:x}", entry.parent_id),
            "entry created"
        );
        Ok(entry)
    }

    async fn commit_create(&self, mut entry: Entry) -> Result<Entry> {
        let store = self.state.store();
        let volume_id = entry.volume_id;
        let parent_id = entry.parent_id;

        self.count_child(volume_id, parent_id, 1).await?;
        if let Err(e) = self.claim(&mut entry).await {
            self.uncount_child(volume_id, parent_id).await;
            return Err(e);
        }

        if let Err(e) = self.stamp_parent(volume_id, parent_id, entry.mtime).await {
            // Without the stamp nobody would notice the new child; take it back.
            let undo = store
                .transact(vec![
                    Write::delete(Table::Entries, keys::entry(volume_id, entry.file_id)),
                    Write::delete(
                        Table::NameHolders,
                        keys::name_holder(volume_id, parent_id, &entry.name),
                    ),
                ])
                .await;
            match undo {
                Ok(()) => self.uncount_child(volume_id, parent_id).await,
                Err(undo_err) => tracing::error!(
                    volume_id,
                    file_id = %format!("{:x}", entry.file_id),
                    error = %undo_err,
                    "failed to take back a half-created entry"
                ),
            }
            return Err(e);
        }
        Ok(entry)
    }

    /// Give `entry` a fresh id and its name. The record is written before
    /// the name holder, so a listed name always resolves.
    async fn claim(&self, entry: &mut Entry) -> Result<()> {
        let store = self.state.store();
        let volume_id = entry.volume_id;

        let mut claimed = false;
        for _ in 0..4 {
            entry.file_id = rand::random::<u64>().max(1);
            if store
                .insert_record_if_absent(
                    Table::Entries,
                    &keys::entry(volume_id, entry.file_id),
                    &*entry,
                )
                .await?
            {
                claimed = true;
                break;
            }
        }
        if !claimed {
            return Err(Error::Internal("could not allocate a file id".to_string()));
        }

        let holder = keys::name_holder(volume_id, entry.parent_id, &entry.name);
        let named = store
            .insert_record_if_absent(Table::NameHolders, &holder, &entry.file_id)
            .await;
        if !matches!(named, Ok(true)) {
            store
                .delete(Table::Entries, &keys::entry(volume_id, entry.file_id))
                .await?;
            named?;
            return Err(rejected(ReplyError::AlreadyExists));
        }
        Ok(())
    }

    /// Apply attribute changes. Files may only be changed by their
    /// coordinator; mode and owner only by the entry's owner.
    pub async fn update(
        &self,
        identity: Identity,
        volume_id: VolumeId,
        patch: EntryPatch,
    ) -> Result<Entry> {
        let current = self
            .lookup(volume_id, patch.file_id)
            .await?
            .ok_or(rejected(ReplyError::NotFound))?;
        // Directory stamps must also clear the merged child mtime.
        let floor = current.mtime;

        let mut verdict: std::result::Result<(), ReplyError> = Ok(());
        let updated: Option<Entry> = self
            .state
            .store()
            .update_record(
                Table::Entries,
                &keys::entry(volume_id, patch.file_id),
                |record: Option<Entry>| {
                    let Some(mut record) = record else {
                        verdict = Err(ReplyError::NotFound);
                        return None;
                    };
                    if let Err(code) = check_update(&record, identity, &patch) {
                        verdict = Err(code);
                        return None;
                    }
                    if let Some(size) = patch.size {
                        record.size = size;
                    }
                    if let Some(mode) = patch.mode {
                        record.mode = mode & 0o7777;
                    }
                    if let Some(owner_id) = patch.owner_id {
                        record.owner_id = owner_id;
                    }
                    record.version = patch.version;
                    let mtime = Timestamp::latest_after(record.mtime.max(floor));
                    touch(&mut record, mtime);
                    Some(record)
                },
            )
            .await?;
        verdict.map_err(rejected)?;

        self.state
            .cache()
            .invalidate(&CacheKey::Entry(volume_id, patch.file_id))
            .await;
        let record = updated.ok_or(rejected(ReplyError::NotFound))?;
        self.visible(record).await
    }

    /// Make the calling gateway the coordinator of a file.
    pub async fn chcoord(
        &self,
        identity: Identity,
        volume_id: VolumeId,
        file_id: FileId,
    ) -> Result<Entry> {
        let mut verdict: std::result::Result<(), ReplyError> = Ok(());
        let updated: Option<Entry> = self
            .state
            .store()
            .update_record(
                Table::Entries,
                &keys::entry(volume_id, file_id),
                |record: Option<Entry>| {
                    let Some(mut record) = record else {
                        verdict = Err(ReplyError::NotFound);
                        return None;
                    };
                    let Some(gateway_id) = identity.gateway_id else {
                        verdict = Err(ReplyError::PermissionDenied);
                        return None;
                    };
                    if record.is_dir() {
                        verdict = Err(ReplyError::Invalid);
                        return None;
                    }
                    if !can_write(&record, identity.owner_id) {
                        verdict = Err(ReplyError::PermissionDenied);
                        return None;
                    }
                    if record.coordinator_id != gateway_id {
                        record.coordinator_id = gateway_id;
                        let mtime = Timestamp::latest_after(record.mtime);
                        touch(&mut record, mtime);
                    }
                    Some(record)
                },
            )
            .await?;
        verdict.map_err(rejected)?;

        self.state
            .cache()
            .invalidate(&CacheKey::Entry(volume_id, file_id))
            .await;
        updated.ok_or(rejected(ReplyError::NotFound))
    }

    /// Remove a file or an empty directory from a writable parent.
    pub async fn delete(
        &self,
        identity: Identity,
        volume_id: VolumeId,
        file_id: FileId,
    ) -> Result<FileId> {
        if file_id == ROOT_FILE_ID {
            return Err(rejected(ReplyError::Invalid));
        }
        let entry = self
            .record(volume_id, file_id)
            .await?
            .ok_or(rejected(ReplyError::NotFound))?;
        let parent = self
            .lookup(volume_id, entry.parent_id)
            .await?
            .ok_or(rejected(ReplyError::NotFound))?;

        if !can_write(&parent, identity.owner_id) {
            return Err(rejected(ReplyError::PermissionDenied));
        }
        if !entry.is_dir() && Some(entry.coordinator_id) != identity.gateway_id {
            return Err(rejected(ReplyError::NotCoordinator));
        }

        let store = self.state.store();
        if entry.is_dir()
            && !store
                .scan_prefix(Table::NameHolders, &keys::children_prefix(volume_id, file_id))
                .await?
                .is_empty()
        {
            return Err(rejected(ReplyError::NotEmpty));
        }

        let state = self.state.clone();
        let floor = parent.mtime;
        fanout::detached("delete", async move {
            EntryStore::new(&state).commit_delete(entry, floor).await
        })
        .await?;

        tracing::debug!(volume_id, file_id = %format!("{:x}", file_id), "entry deleted");
        Ok(file_id)
    }

    /// Once the records are gone the delete has happened; aggregate
    /// failures after that are logged and leave the counts high.
    async fn commit_delete(&self, entry: Entry, floor: Timestamp) -> Result<()> {
        let store = self.state.store();
        let volume_id = entry.volume_id;
        let file_id = entry.file_id;

        let mut writes = vec![
            Write::delete(Table::Entries, keys::entry(volume_id, file_id)),
            Write::delete(
                Table::NameHolders,
                keys::name_holder(volume_id, entry.parent_id, &entry.name),
            ),
        ];
        for (key, _) in store
            .scan_prefix(Table::Xattrs, &keys::xattr_prefix(volume_id, file_id))
            .await?
        {
            writes.push(Write::delete(Table::Xattrs, key));
        }
        store.transact(writes).await?;
        self.state
            .cache()
            .invalidate(&CacheKey::Entry(volume_id, file_id))
            .await;

        if let Err(e) = self.stamp_parent(volume_id, entry.parent_id, floor).await {
            tracing::warn!(volume_id, error = %e, "deleted entry without stamping its parent");
        }
        self.uncount_child(volume_id, entry.parent_id).await;

        if entry.is_dir() {
            let shards = self.state.shards();
            let counter_key = keys::children_counter(volume_id, file_id);
            let tracker_key = keys::mtime_tracker(volume_id, file_id);
            let cleared = tokio::try_join!(
                shards.clear::<i64>(&counter_key),
                shards.clear::<MaxStamp>(&tracker_key),
            );
            if let Err(e) = cleared {
                tracing::warn!(volume_id, error = %e, "leaving shards of a deleted directory");
            }
        }
        Ok(())
    }

    /// Move an entry to `new_name` under `new_parent_id`. Both parents must
    /// be writable, the destination name free, and a directory may not be
    /// moved below itself.
    pub async fn rename(
        &self,
        identity: Identity,
        volume_id: VolumeId,
        file_id: FileId,
        new_parent_id: FileId,
        new_name: String,
    ) -> Result<Entry> {
        if file_id == ROOT_FILE_ID {
            return Err(rejected(ReplyError::Invalid));
        }
        validate_name(&new_name)?;

        let entry = self
            .record(volume_id, file_id)
            .await?
            .ok_or(rejected(ReplyError::NotFound))?;
        if !can_read(&entry, identity.owner_id) {
            return Err(rejected(ReplyError::PermissionDenied));
        }
        let (parent, new_parent) = tokio::try_join!(
            self.lookup(volume_id, entry.parent_id),
            self.lookup(volume_id, new_parent_id),
        )?;
        let parent = parent.ok_or(rejected(ReplyError::NotFound))?;
        let new_parent = new_parent.ok_or(rejected(ReplyError::NotFound))?;
        if !new_parent.is_dir() {
            return Err(rejected(ReplyError::Invalid));
        }
        if !can_write(&parent, identity.owner_id) || !can_write(&new_parent, identity.owner_id) {
            return Err(rejected(ReplyError::PermissionDenied));
        }
        if entry.parent_id == new_parent_id && entry.name == new_name {
            return self.visible(entry).await;
        }
        if entry.is_dir() {
            self.check_not_below(volume_id, file_id, new_parent_id).await?;
        }

        let state = self.state.clone();
        let floor = parent.mtime.max(new_parent.mtime);
        let renamed = fanout::detached("rename", async move {
            EntryStore::new(&state)
                .commit_rename(entry, new_parent_id, new_name, floor)
                .await
        })
        .await?;

        tracing::debug!(
            volume_id,
            file_id = %format!("{:x}", file_id),
            parent_id = %format!("{:x}", new_parent_id),
            "entry renamed"
        );
        self.visible(renamed).await
    }

    /// Walk up from `dir_id` and refuse if `file_id` is among its ancestors.
    async fn check_not_below(
        &self,
        volume_id: VolumeId,
        file_id: FileId,
        dir_id: FileId,
    ) -> Result<()> {
        let mut cursor = dir_id;
        for _ in 0..MAX_DEPTH {
            if cursor == file_id {
                return Err(rejected(ReplyError::Invalid));
            }
            if cursor == ROOT_FILE_ID {
                return Ok(());
            }
            cursor = self
                .record(volume_id, cursor)
                .await?
                .ok_or(rejected(ReplyError::NotFound))?
                .parent_id;
        }
        Err(rejected(ReplyError::Invalid))
    }

    async fn commit_rename(
        &self,
        entry: Entry,
        new_parent_id: FileId,
        new_name: String,
        floor: Timestamp,
    ) -> Result<Entry> {
        let store = self.state.store();
        let volume_id = entry.volume_id;
        let file_id = entry.file_id;
        let old_parent_id = entry.parent_id;
        let moving = old_parent_id != new_parent_id;
        let new_holder = keys::name_holder(volume_id, new_parent_id, &new_name);

        if moving {
            self.bump_children(volume_id, new_parent_id, 1).await?;
        }
        let undo_count = || async {
            if moving {
                if let Err(e) = self.bump_children(volume_id, new_parent_id, -1).await {
                    tracing::warn!(volume_id, error = %e, "child count left high after failed rename");
                }
            }
        };

        match store
            .insert_record_if_absent(Table::NameHolders, &new_holder, &file_id)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                undo_count().await;
                return Err(rejected(ReplyError::AlreadyExists));
            }
            Err(e) => {
                undo_count().await;
                return Err(e.into());
            }
        }

        let mut verdict: std::result::Result<(), ReplyError> = Ok(());
        let moved: Result<Option<Entry>> = store
            .update_record(
                Table::Entries,
                &keys::entry(volume_id, file_id),
                |record: Option<Entry>| {
                    let Some(mut record) = record else {
                        verdict = Err(ReplyError::NotFound);
                        return None;
                    };
                    // Lost a race with another rename of the same entry.
                    if record.parent_id != old_parent_id || record.name != entry.name {
                        verdict = Err(ReplyError::NotFound);
                        return None;
                    }
                    record.parent_id = new_parent_id;
                    record.name = new_name;
                    let mtime = Timestamp::latest_after(record.mtime);
                    touch(&mut record, mtime);
                    Some(record)
                },
            )
            .await
            .map_err(Error::from);
        let moved = match (moved, verdict) {
            (Ok(Some(record)), Ok(())) => record,
            (result, verdict) => {
                if let Err(e) = store.delete(Table::NameHolders, &new_holder).await {
                    tracing::error!(volume_id, error = %e, "failed to release a claimed name");
                }
                undo_count().await;
                result?;
                verdict.map_err(rejected)?;
                return Err(rejected(ReplyError::NotFound));
            }
        };

        self.state
            .cache()
            .invalidate(&CacheKey::Entry(volume_id, file_id))
            .await;
        store
            .delete(
                Table::NameHolders,
                &keys::name_holder(volume_id, old_parent_id, &entry.name),
            )
            .await?;

        let stamped = if moving {
            if let Err(e) = self.bump_children(volume_id, old_parent_id, -1).await {
                tracing::warn!(volume_id, error = %e, "child count left high after rename");
            }
            tokio::try_join!(
                self.stamp_parent(volume_id, old_parent_id, floor),
                self.stamp_parent(volume_id, new_parent_id, floor),
            )
            .map(|_| ())
        } else {
            self.stamp_parent(volume_id, new_parent_id, floor)
                .await
                .map(|_| ())
        };
        if let Err(e) = stamped {
            tracing::warn!(volume_id, error = %e, "renamed entry without stamping its parents");
        }
        Ok(moved)
    }

    async fn bump_children(&self, volume_id: VolumeId, parent_id: FileId, delta: i64) -> Result<()> {
        self.state
            .shards()
            .increment(&keys::children_counter(volume_id, parent_id), delta)
            .await
    }

    /// Count a new child of `parent_id` and a new file of the volume.
    async fn count_child(&self, volume_id: VolumeId, parent_id: FileId, delta: i64) -> Result<()> {
        let shards = self.state.shards();
        let files = keys::file_count(volume_id);
        tokio::try_join!(
            self.bump_children(volume_id, parent_id, delta),
            shards.increment(&files, delta),
        )?;
        Ok(())
    }

    /// Best-effort reversal of [`EntryStore::count_child`]. A failure
    /// leaves the counts high.
    async fn uncount_child(&self, volume_id: VolumeId, parent_id: FileId) {
        if let Err(e) = self.count_child(volume_id, parent_id, -1).await {
            tracing::warn!(volume_id, error = %e, "child counts left high");
        }
    }

    /// Push the parent's mtime tracker past everything it has seen so far,
    /// which changes the parent's visible write nonce.
    async fn stamp_parent(
        &self,
        volume_id: VolumeId,
        parent_id: FileId,
        floor: Timestamp,
    ) -> Result<Timestamp> {
        let shards = self.state.shards();
        let tracker = keys::mtime_tracker(volume_id, parent_id);
        let seen = shards.max(&tracker).await?;
        let stamp = Timestamp::latest_after(seen.time.max(floor));
        shards.set_max(&tracker, MaxStamp::at(stamp)).await?;
        Ok(stamp)
    }
}

fn check_update(
    record: &Entry,
    identity: Identity,
    patch: &EntryPatch,
) -> std::result::Result<(), ReplyError> {
    if !can_write(record, identity.owner_id) {
        return Err(ReplyError::PermissionDenied);
    }
    if record.ftype == EntryType::File && Some(record.coordinator_id) != identity.gateway_id {
        return Err(ReplyError::NotCoordinator);
    }
    if patch.version < record.version {
        return Err(ReplyError::StaleVersion);
    }
    let changes_ownership = patch.mode.is_some_and(|m| m & 0o7777 != record.mode)
        || patch.owner_id.is_some_and(|o| o != record.owner_id);
    if changes_ownership && !is_owner(record, identity.owner_id) {
        return Err(ReplyError::PermissionDenied);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use metadata_store::{MemoryStore, MokaCache};

    use super::*;
    use crate::service_config::Config;

    const VOLUME: VolumeId = 1;
    const OWNER: OwnerId = 10;
    const OTHER: OwnerId = 20;

    async fn seeded_on(store: MemoryStore, config: Config) -> State {
        let cache = MokaCache::new(config.cache_config());
        let state = State::new(Arc::new(store), Arc::new(cache), config);
        let root = EntryStore::root_entry(VOLUME, OWNER);
        state
            .store()
            .put_record(Table::Entries, &keys::entry(VOLUME, ROOT_FILE_ID), &root)
            .await
            .unwrap();
        state
    }

    async fn seeded() -> State {
        seeded_on(MemoryStore::new(), Config::default()).await
    }

    fn children_summary(dir_id: FileId) -> CacheKey {
        CacheKey::ShardSummary(format!(
            "shardcounter-{}",
            keys::children_counter(VOLUME, dir_id)
        ))
    }

    fn owner() -> Identity {
        Identity::gateway(OWNER, 100)
    }

    fn new_file(name: &str, mode: u32) -> NewEntry {
        new_file_in(ROOT_FILE_ID, name, mode)
    }

    fn new_file_in(parent_id: FileId, name: &str, mode: u32) -> NewEntry {
        NewEntry {
            parent_id,
            name: name.to_string(),
            ftype: EntryType::File,
            mode,
            size: 42,
        }
    }

    fn new_dir(parent_id: FileId, name: &str) -> NewEntry {
        NewEntry {
            parent_id,
            name: name.to_string(),
            ftype: EntryType::Dir,
            mode: 0o755,
            size: 0,
        }
    }

    #[tokio::test]
    async fn test_create_bumps_parent_aggregates() {
        let state = seeded().await;
        let entries = state.entries();
        let before = entries.lookup(VOLUME, ROOT_FILE_ID).await.unwrap().unwrap();

        let file = entries
            .create(owner(), VOLUME, new_file("a.txt", 0o644))
            .await
            .unwrap();
        assert_ne!(file.file_id, ROOT_FILE_ID);
        assert_eq!(file.owner_id, OWNER);
        assert_eq!(file.coordinator_id, 100);

        let after = entries.lookup(VOLUME, ROOT_FILE_ID).await.unwrap().unwrap();
        assert_eq!(after.num_children, 1);
        assert!(after.mtime > before.mtime);
        assert_ne!(after.write_nonce, before.write_nonce);
        assert_eq!(after.version, before.version);

        // The directory record itself was never rewritten.
        let record = entries.record(VOLUME, ROOT_FILE_ID).await.unwrap().unwrap();
        assert_eq!(record.write_nonce, before.write_nonce);
        assert_eq!(state.catalog().file_count(VOLUME).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_name_conflicts() {
        let state = seeded().await;
        let entries = state.entries();
        entries
            .create(owner(), VOLUME, new_file("same", 0o644))
            .await
            .unwrap();
        let err = entries
            .create(owner(), VOLUME, new_file("same", 0o644))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(ReplyError::AlreadyExists)));

        let root = entries.lookup(VOLUME, ROOT_FILE_ID).await.unwrap().unwrap();
        assert_eq!(root.num_children, 1);
    }

    #[tokio::test]
    async fn test_invalid_names() {
        let state = seeded().await;
        for name in ["", ".", "..", "a/b"] {
            let err = state
                .entries()
                .create(owner(), VOLUME, new_file(name, 0o644))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Rejected(ReplyError::Invalid)), "{name:?}");
        }
    }

    #[tokio::test]
    async fn test_create_needs_parent_write() {
        let state = seeded().await;
        let err = state
            .entries()
            .create(Identity::gateway(OTHER, 200), VOLUME, new_file("x", 0o644))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(ReplyError::PermissionDenied)));

        let err = state
            .entries()
            .create(Identity::anonymous(), VOLUME, new_file("x", 0o644))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(ReplyError::PermissionDenied)));
    }

    #[tokio::test]
    async fn test_read_permission_boundary() {
        let state = seeded().await;
        let entries = state.entries();
        let private = entries
            .create(owner(), VOLUME, new_file("private", 0o600))
            .await
            .unwrap();
        let public = entries
            .create(owner(), VOLUME, new_file("public", 0o644))
            .await
            .unwrap();

        let stranger = Identity::gateway(OTHER, 200);
        assert!(matches!(
            entries.read(stranger, VOLUME, private.file_id).await,
            Err(Error::Rejected(ReplyError::PermissionDenied))
        ));
        assert!(entries.read(stranger, VOLUME, public.file_id).await.is_ok());
        assert!(entries.read(owner(), VOLUME, private.file_id).await.is_ok());

        let listing = entries
            .list_children(stranger, VOLUME, ROOT_FILE_ID)
            .await
            .unwrap();
        let names: Vec<_> = listing.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["public"]);
    }

    #[tokio::test]
    async fn test_update_rules() {
        let state = seeded().await;
        let entries = state.entries();
        let file = entries
            .create(owner(), VOLUME, new_file("f", 0o666))
            .await
            .unwrap();

        let patch = EntryPatch {
            file_id: file.file_id,
            version: 2,
            size: Some(4096),
            ..EntryPatch::default()
        };
        let updated = entries.update(owner(), VOLUME, patch.clone()).await.unwrap();
        assert_eq!(updated.size, 4096);
        assert_eq!(updated.version, 2);
        assert!(updated.write_nonce > file.write_nonce);
        assert!(updated.mtime > file.mtime);

        // Going backwards is refused.
        let stale = EntryPatch {
            version: 1,
            ..patch.clone()
        };
        assert!(matches!(
            entries.update(owner(), VOLUME, stale).await,
            Err(Error::Rejected(ReplyError::StaleVersion))
        ));

        // World-writable, but only the coordinator may write a file.
        let other_gateway = Identity::gateway(OTHER, 200);
        assert!(matches!(
            entries.update(other_gateway, VOLUME, patch.clone()).await,
            Err(Error::Rejected(ReplyError::NotCoordinator))
        ));

        // After taking coordination it can write, but not chmod.
        entries
            .chcoord(other_gateway, VOLUME, file.file_id)
            .await
            .unwrap();
        entries
            .update(other_gateway, VOLUME, patch.clone())
            .await
            .unwrap();
        let chmod = EntryPatch {
            mode: Some(0o600),
            ..patch
        };
        assert!(matches!(
            entries.update(other_gateway, VOLUME, chmod).await,
            Err(Error::Rejected(ReplyError::PermissionDenied))
        ));
    }

    #[tokio::test]
    async fn test_delete_file_and_directories() {
        let state = seeded().await;
        let entries = state.entries();
        let dir = entries
            .create(owner(), VOLUME, new_dir(ROOT_FILE_ID, "d"))
            .await
            .unwrap();
        let inner = entries
            .create(owner(), VOLUME, new_dir(dir.file_id, "inner"))
            .await
            .unwrap();

        assert!(matches!(
            entries.delete(owner(), VOLUME, dir.file_id).await,
            Err(Error::Rejected(ReplyError::NotEmpty))
        ));
        assert!(matches!(
            entries.delete(owner(), VOLUME, ROOT_FILE_ID).await,
            Err(Error::Rejected(ReplyError::Invalid))
        ));

        entries.delete(owner(), VOLUME, inner.file_id).await.unwrap();
        entries.delete(owner(), VOLUME, dir.file_id).await.unwrap();

        assert!(entries.lookup(VOLUME, dir.file_id).await.unwrap().is_none());
        let root = entries.lookup(VOLUME, ROOT_FILE_ID).await.unwrap().unwrap();
        assert_eq!(root.num_children, 0);
        assert_eq!(state.catalog().file_count(VOLUME).await.unwrap(), 0);

        // The name is free again.
        entries
            .create(owner(), VOLUME, new_dir(ROOT_FILE_ID, "d"))
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_in_one_directory() {
        let state = seeded().await;
        let tasks: Vec<_> = (0..30)
            .map(|i| {
                let state = state.clone();
                tokio::spawn(async move {
                    state
                        .entries()
                        .create(owner(), VOLUME, new_file(&format!("f{i}"), 0o644))
                        .await
                        .unwrap()
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let listing = state
            .entries()
            .list_children(owner(), VOLUME, ROOT_FILE_ID)
            .await
            .unwrap();
        assert_eq!(listing.len(), 30);
        state.cache().invalidate(&children_summary(ROOT_FILE_ID)).await;
        let root = state
            .entries()
            .lookup(VOLUME, ROOT_FILE_ID)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(root.num_children, 30);
    }

    #[tokio::test]
    async fn test_create_on_a_slow_store_still_counts() {
        let store = MemoryStore::new();
        let config = Config {
            fetch_timeout_ms: 50,
            ..Config::default()
        };
        let state = seeded_on(store.clone(), config).await;
        let entries = state.entries();
        // Warm every read the create path makes.
        let before = entries.lookup(VOLUME, ROOT_FILE_ID).await.unwrap().unwrap();
        assert_eq!(before.num_children, 0);

        // Each write now takes longer than any read may.
        store.set_latency(Some(Duration::from_millis(80)));
        let file = entries
            .create(owner(), VOLUME, new_file("slow", 0o644))
            .await
            .unwrap();
        store.set_latency(None);

        let root = entries.lookup(VOLUME, ROOT_FILE_ID).await.unwrap().unwrap();
        assert_eq!(root.num_children, 1);
        assert!(root.write_nonce > before.write_nonce);
        let listing = entries
            .list_children(owner(), VOLUME, ROOT_FILE_ID)
            .await
            .unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].file_id, file.file_id);
    }

    #[tokio::test]
    async fn test_abandoned_create_lands_whole() {
        let store = MemoryStore::new();
        let state = seeded_on(store.clone(), Config::default()).await;
        let entries = state.entries();
        let before = entries.lookup(VOLUME, ROOT_FILE_ID).await.unwrap().unwrap();

        store.set_latency(Some(Duration::from_millis(20)));
        let abandoned = tokio::time::timeout(
            Duration::from_millis(5),
            entries.create(owner(), VOLUME, new_file("orphan", 0o644)),
        )
        .await;
        assert!(abandoned.is_err());
        store.set_latency(None);

        // The parent stamp is the last step of a create.
        let mut stamped = false;
        for _ in 0..100 {
            let root = entries.lookup(VOLUME, ROOT_FILE_ID).await.unwrap().unwrap();
            if root.write_nonce != before.write_nonce {
                stamped = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(stamped);

        let listing = entries
            .list_children(owner(), VOLUME, ROOT_FILE_ID)
            .await
            .unwrap();
        assert_eq!(listing.len(), 1);
        state.cache().invalidate(&children_summary(ROOT_FILE_ID)).await;
        let root = entries.lookup(VOLUME, ROOT_FILE_ID).await.unwrap().unwrap();
        assert_eq!(root.num_children, 1);
        assert_eq!(state.catalog().file_count(VOLUME).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_create_takes_back_its_counts() {
        let store = MemoryStore::new();
        let state = seeded_on(store.clone(), Config::default()).await;
        let entries = state.entries();
        entries
            .create(owner(), VOLUME, new_file("taken", 0o644))
            .await
            .unwrap();

        let err = entries
            .create(owner(), VOLUME, new_file("taken", 0o644))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Rejected(ReplyError::AlreadyExists)));

        state.cache().invalidate(&children_summary(ROOT_FILE_ID)).await;
        let root = entries.lookup(VOLUME, ROOT_FILE_ID).await.unwrap().unwrap();
        assert_eq!(root.num_children, 1);
        assert_eq!(state.catalog().file_count(VOLUME).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_successive_updates_raise_the_nonce() {
        let state = seeded().await;
        let entries = state.entries();
        let file = entries
            .create(owner(), VOLUME, new_file("f", 0o644))
            .await
            .unwrap();

        let mut last = file.write_nonce;
        for version in 2..22i64 {
            let patch = EntryPatch {
                file_id: file.file_id,
                version,
                size: Some(version as u64),
                ..EntryPatch::default()
            };
            let updated = entries.update(owner(), VOLUME, patch).await.unwrap();
            assert!(updated.write_nonce > last, "version {version}");
            assert_eq!(updated.write_nonce, write_nonce_at(updated.mtime));
            last = updated.write_nonce;
        }
    }

    #[tokio::test]
    async fn test_directory_nonce_only_moves_forward() {
        let state = seeded().await;
        let entries = state.entries();
        let dir = entries
            .create(owner(), VOLUME, new_dir(ROOT_FILE_ID, "d"))
            .await
            .unwrap();

        let mut last = dir.write_nonce;
        for i in 0..10 {
            entries
                .create(owner(), VOLUME, new_file_in(dir.file_id, &format!("f{i}"), 0o644))
                .await
                .unwrap();
            let seen = entries.lookup(VOLUME, dir.file_id).await.unwrap().unwrap();
            assert!(seen.write_nonce > last, "after child {i}");
            last = seen.write_nonce;

            let patch = EntryPatch {
                file_id: dir.file_id,
                version: 1,
                ..EntryPatch::default()
            };
            let touched = entries.update(owner(), VOLUME, patch).await.unwrap();
            assert!(touched.write_nonce > last, "after update {i}");
            last = touched.write_nonce;
        }
    }

    #[tokio::test]
    async fn test_children_of_a_removed_directory() {
        let state = seeded().await;
        let entries = state.entries();
        let dir = entries
            .create(owner(), VOLUME, new_dir(ROOT_FILE_ID, "gone"))
            .await
            .unwrap();
        let seen = entries.read(owner(), VOLUME, dir.file_id).await.unwrap();
        entries.delete(owner(), VOLUME, dir.file_id).await.unwrap();

        // A listing of the copy read earlier does not re-read the directory.
        let children = entries.children_of(owner(), &seen).await.unwrap();
        assert!(children.is_empty());
        assert!(matches!(
            entries.list_children(owner(), VOLUME, dir.file_id).await,
            Err(Error::Rejected(ReplyError::NotFound))
        ));
    }

    #[tokio::test]
    async fn test_listing_pages() {
        let state = seeded().await;
        let entries = state.entries();
        for i in 0..23 {
            entries
                .create(owner(), VOLUME, new_file(&format!("f{i:02}"), 0o644))
                .await
                .unwrap();
        }

        let mut names = Vec::new();
        let mut page_id = Some(0);
        let mut pages = 0;
        while let Some(id) = page_id {
            let (page, next) = entries
                .list_page(owner(), VOLUME, ROOT_FILE_ID, id)
                .await
                .unwrap();
            assert!(page.len() <= RESOLVE_MAX_PAGE_SIZE as usize);
            names.extend(page.into_iter().map(|e| e.name));
            page_id = next;
            pages += 1;
        }
        assert_eq!(pages, 3);
        let expected: Vec<String> = (0..23).map(|i| format!("f{i:02}")).collect();
        assert_eq!(names, expected);

        let (past_end, next) = entries
            .list_page(owner(), VOLUME, ROOT_FILE_ID, 9)
            .await
            .unwrap();
        assert!(past_end.is_empty());
        assert_eq!(next, None);
    }

    #[tokio::test]
    async fn test_child_by_name() {
        let state = seeded().await;
        let entries = state.entries();
        let file = entries
            .create(owner(), VOLUME, new_file("named", 0o600))
            .await
            .unwrap();

        let found = entries
            .child(owner(), VOLUME, ROOT_FILE_ID, "named")
            .await
            .unwrap();
        assert_eq!(found.file_id, file.file_id);
        assert!(matches!(
            entries.child(owner(), VOLUME, ROOT_FILE_ID, "other").await,
            Err(Error::Rejected(ReplyError::NotFound))
        ));
        assert!(matches!(
            entries
                .child(Identity::gateway(OTHER, 200), VOLUME, ROOT_FILE_ID, "named")
                .await,
            Err(Error::Rejected(ReplyError::PermissionDenied))
        ));
        assert!(matches!(
            entries.child(owner(), VOLUME, file.file_id, "x").await,
            Err(Error::Rejected(ReplyError::Invalid))
        ));
    }

    #[tokio::test]
    async fn test_rename_between_directories() {
        let state = seeded().await;
        let entries = state.entries();
        let dir = entries
            .create(owner(), VOLUME, new_dir(ROOT_FILE_ID, "d"))
            .await
            .unwrap();
        let file = entries
            .create(owner(), VOLUME, new_file("a", 0o644))
            .await
            .unwrap();
        let root_before = entries.lookup(VOLUME, ROOT_FILE_ID).await.unwrap().unwrap();
        let dir_before = entries.lookup(VOLUME, dir.file_id).await.unwrap().unwrap();

        let moved = entries
            .rename(owner(), VOLUME, file.file_id, dir.file_id, "b".to_string())
            .await
            .unwrap();
        assert_eq!(moved.parent_id, dir.file_id);
        assert_eq!(moved.name, "b");
        assert!(moved.write_nonce > file.write_nonce);

        let root = entries.lookup(VOLUME, ROOT_FILE_ID).await.unwrap().unwrap();
        let dir_after = entries.lookup(VOLUME, dir.file_id).await.unwrap().unwrap();
        assert_eq!(root.num_children, 1);
        assert_eq!(dir_after.num_children, 1);
        assert!(root.write_nonce > root_before.write_nonce);
        assert!(dir_after.write_nonce > dir_before.write_nonce);
        assert_eq!(state.catalog().file_count(VOLUME).await.unwrap(), 2);

        let names: Vec<_> = entries
            .list_children(owner(), VOLUME, ROOT_FILE_ID)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["d"]);
        let found = entries
            .child(owner(), VOLUME, dir.file_id, "b")
            .await
            .unwrap();
        assert_eq!(found.file_id, file.file_id);

        // The old name is free again.
        entries
            .create(owner(), VOLUME, new_file("a", 0o644))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rename_rules() {
        let state = seeded().await;
        let entries = state.entries();
        let outer = entries
            .create(owner(), VOLUME, new_dir(ROOT_FILE_ID, "outer"))
            .await
            .unwrap();
        let inner = entries
            .create(owner(), VOLUME, new_dir(outer.file_id, "inner"))
            .await
            .unwrap();
        let file = entries
            .create(owner(), VOLUME, new_file("f", 0o644))
            .await
            .unwrap();

        let cases = [
            (ROOT_FILE_ID, outer.file_id, "root", ReplyError::Invalid),
            (outer.file_id, inner.file_id, "loop", ReplyError::Invalid),
            (outer.file_id, outer.file_id, "self", ReplyError::Invalid),
            (file.file_id, ROOT_FILE_ID, "outer", ReplyError::AlreadyExists),
            (file.file_id, file.file_id, "x", ReplyError::Invalid),
            (file.file_id, ROOT_FILE_ID, "a/b", ReplyError::Invalid),
            (0xdead, ROOT_FILE_ID, "x", ReplyError::NotFound),
        ];
        for (file_id, new_parent_id, name, code) in cases {
            let err = entries
                .rename(owner(), VOLUME, file_id, new_parent_id, name.to_string())
                .await
                .unwrap_err();
            assert!(matches!(err, Error::Rejected(c) if c == code), "{name}: {err:?}");
        }

        let stranger = Identity::gateway(OTHER, 200);
        assert!(matches!(
            entries
                .rename(stranger, VOLUME, file.file_id, ROOT_FILE_ID, "g".to_string())
                .await,
            Err(Error::Rejected(ReplyError::PermissionDenied))
        ));

        // Nothing above changed the tree.
        state.cache().invalidate(&children_summary(ROOT_FILE_ID)).await;
        let root = entries.lookup(VOLUME, ROOT_FILE_ID).await.unwrap().unwrap();
        assert_eq!(root.num_children, 2);
        let unchanged = entries
            .rename(owner(), VOLUME, file.file_id, ROOT_FILE_ID, "f".to_string())
            .await
            .unwrap();
        assert_eq!(unchanged.write_nonce, file.write_nonce);
    }
}
