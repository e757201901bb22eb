use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};

const NANOS_PER_SEC: i32 = 1_000_000_000;

/// A (seconds, nanoseconds) wall-clock stamp.
///
/// Ordering is lexicographic over `(sec, nsec)`, which is what every
/// max-tracker and freshness comparison relies on.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    pub sec: i64,
    pub nsec: i32,
}

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp { sec: 0, nsec: 0 };

    pub fn new(sec: i64, nsec: i32) -> Self {
        Self { sec, nsec }
    }

    pub fn now() -> Self {
        let now = Utc::now();
        Self {
            sec: now.timestamp(),
            nsec: now.timestamp_subsec_nanos() as i32,
        }
    }

    /// The smallest stamp strictly greater than `self`.
    pub fn next(self) -> Self {
        if self.nsec + 1 >= NANOS_PER_SEC {
            Self {
                sec: self.sec + 1,
                nsec: 0,
            }
        } else {
            Self {
                sec: self.sec,
                nsec: self.nsec + 1,
            }
        }
    }

    /// Current time, bumped past `previous` if the clock has not moved
    /// beyond it. Mutations use this so stamps on one object strictly increase.
    pub fn latest_after(previous: Timestamp) -> Self {
        Self::now().max(previous.next())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}
