//! Shared data model for the Syndicate metadata service.
//!
//! Everything in here is transport- and storage-agnostic:
//!
//! - **[`volume`]**, **[`entry`]**, **[`gateway`]**, **[`user`]**: persisted records
//! - **[`caps`]**: gateway capability bits
//! - **[`crypto`]**: ed25519 keys and blake3 session MACs
//! - **[`signed`]**: the zero-then-serialize signed envelope codec
//! - **[`messages`]**: registration, resolve and update wire messages
//! - **[`request_info`]**: verified view of a block/manifest request
//!
//! The metadata service (`syndicate-ms`) and gateway implementations both
//! depend on this crate so that signatures computed on one side verify on
//! the other.

pub mod caps;
pub mod crypto;
pub mod entry;
pub mod gateway;
pub mod messages;
pub mod request_info;
pub mod signed;
pub mod time;
pub mod user;
pub mod version;
pub mod volume;

pub mod prelude {
    pub use crate::caps::Capabilities;
    pub use crate::crypto::{PublicKey, SecretKey, SessionKey};
    pub use crate::entry::{Entry, EntryType, FileId, ROOT_FILE_ID};
    pub use crate::gateway::{Gateway, GatewayCert, GatewayId, GatewayType, VolumeCertBundle};
    pub use crate::signed::Signed;
    pub use crate::time::Timestamp;
    pub use crate::user::{OwnerId, User};
    pub use crate::volume::{Volume, VolumeDescriptor, VolumeId};
}
