use serde::{Deserialize, Serialize};

use crate::gateway::GatewayId;
use crate::time::Timestamp;
use crate::user::OwnerId;
use crate::volume::VolumeId;

pub type FileId = u64;

/// Every volume's root directory has this id.
pub const ROOT_FILE_ID: FileId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    File,
    Dir,
}

/// Metadata record for one file or directory.
///
/// For directories `num_children` and `mtime` as returned to callers are
/// merged from the directory's sharded aggregates; the persisted record
/// only holds the values set by the directory's own attribute updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub volume_id: VolumeId,
    pub file_id: FileId,
    pub parent_id: FileId,
    pub name: String,
    pub ftype: EntryType,
    pub version: i64,
    /// Derived from `mtime` on every mutation; strictly increases. Never zero.
    pub write_nonce: i64,
    pub owner_id: OwnerId,
    pub coordinator_id: GatewayId,
    pub mode: u32,
    pub size: u64,
    pub ctime: Timestamp,
    pub mtime: Timestamp,
    pub num_children: i64,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        self.ftype == EntryType::Dir
    }

    /// True iff a caller holding `(version, write_nonce)` has this exact copy.
    pub fn matches(&self, version: i64, write_nonce: i64) -> bool {
        self.version == version && self.write_nonce == write_nonce
    }
}

/// The write nonce minted by a mutation stamped `at`.
///
/// Nanoseconds since the epoch, clamped to at least 1 (zero is reserved for
/// "caller has no copy"). Mutations of one entry carry strictly increasing
/// stamps, so its nonces strictly increase too.
pub fn write_nonce_at(at: Timestamp) -> i64 {
    let nanos = i128::from(at.sec) * 1_000_000_000 + i128::from(at.nsec);
    nanos.clamp(1, i128::from(i64::MAX)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_follows_the_stamp() {
        let a = Timestamp::new(1_700_000_000, 5);
        assert_eq!(write_nonce_at(a), 1_700_000_000_000_000_005);
        assert!(write_nonce_at(a.next()) > write_nonce_at(a));
        assert!(write_nonce_at(Timestamp::new(1_700_000_001, 0)) > write_nonce_at(a));
    }

    #[test]
    fn test_nonce_is_never_zero() {
        assert_eq!(write_nonce_at(Timestamp::ZERO), 1);
        assert_eq!(write_nonce_at(Timestamp::new(-5, 0)), 1);
        assert_eq!(write_nonce_at(Timestamp::new(i64::MAX, 0)), i64::MAX);
    }
}
