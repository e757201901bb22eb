//! Unix-style permission checks against an entry's mode bits.
//!
//! Only the owner and "other" classes are consulted. Callers with no
//! owner identity (anonymous reads) are always "other".

use common::entry::Entry;
use common::user::OwnerId;

pub const OTHER_READ: u32 = 0o004;
pub const OTHER_WRITE: u32 = 0o002;

pub fn is_owner(entry: &Entry, caller: Option<OwnerId>) -> bool {
    caller == Some(entry.owner_id)
}

pub fn can_read(entry: &Entry, caller: Option<OwnerId>) -> bool {
    is_owner(entry, caller) || entry.mode & OTHER_READ != 0
}

pub fn can_write(entry: &Entry, caller: Option<OwnerId>) -> bool {
    is_owner(entry, caller) || entry.mode & OTHER_WRITE != 0
}
