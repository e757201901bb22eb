//! Wire messages exchanged between gateways and the metadata service.
//!
//! All of these travel as bincode bodies and are [`Signed`](crate::signed::Signed):
//! requests by the originating user or gateway, replies by the volume.

use serde::{Deserialize, Serialize};

use crate::crypto::SessionKey;
use crate::entry::{Entry, EntryType, FileId};
use crate::gateway::{GatewayCert, GatewayId, GatewayType};
use crate::impl_signed;
use crate::user::OwnerId;
use crate::volume::{VolumeDescriptor, VolumeId};

/// Largest resolve listing a gateway should ask for at once.
pub const RESOLVE_MAX_PAGE_SIZE: u32 = 10;
pub const MAX_NUM_CONNECTIONS: u32 = 50;
pub const MAX_BATCH_REQUEST_SIZE: u32 = 6;
pub const MAX_BATCH_ASYNC_REQUEST_SIZE: u32 = 100;
pub const MAX_TRANSFER_TIME_SECS: u32 = 300;

/// Body of `POST /REGISTER/...`, signed with the user's key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub gateway_type: GatewayType,
    pub gateway_name: String,
    pub volume_name: String,
    pub username: String,
    /// Unix seconds at which the gateway built the request.
    pub timestamp: i64,
    pub signature: Vec<u8>,
}

impl_signed!(RegisterRequest);

/// Static batching limits a volume advertises to its gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowControl {
    pub resolve_page_size: u32,
    pub max_connections: u32,
    pub max_batch_request_size: u32,
    pub max_batch_async_request_size: u32,
    pub max_transfer_time_secs: u32,
}

impl Default for FlowControl {
    fn default() -> Self {
        Self {
            resolve_page_size: RESOLVE_MAX_PAGE_SIZE,
            max_connections: MAX_NUM_CONNECTIONS,
            max_batch_request_size: MAX_BATCH_REQUEST_SIZE,
            max_batch_async_request_size: MAX_BATCH_ASYNC_REQUEST_SIZE,
            max_transfer_time_secs: MAX_TRANSFER_TIME_SECS,
        }
    }
}

/// Volume-signed reply to a successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationMetadata {
    pub session_password: SessionKey,
    pub session_expires: i64,
    pub cert: GatewayCert,
    pub volume: VolumeDescriptor,
    pub sealed_private_key: Option<Vec<u8>>,
    pub flow_control: FlowControl,
    pub signature: Vec<u8>,
}

impl_signed!(RegistrationMetadata);

/// Error code carried inside a signed reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyError {
    NotFound,
    PermissionDenied,
    AlreadyExists,
    NotEmpty,
    NotCoordinator,
    StaleVersion,
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingStatus {
    New,
    NotModified,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub status: ListingStatus,
    pub ftype: Option<EntryType>,
    pub entries: Vec<Entry>,
}

impl Listing {
    pub fn none() -> Self {
        Self {
            status: ListingStatus::None,
            ftype: None,
            entries: Vec::new(),
        }
    }

    pub fn not_modified(ftype: EntryType) -> Self {
        Self {
            status: ListingStatus::NotModified,
            ftype: Some(ftype),
            entries: Vec::new(),
        }
    }

    pub fn new_entries(ftype: EntryType, entries: Vec<Entry>) -> Self {
        Self {
            status: ListingStatus::New,
            ftype: Some(ftype),
            entries,
        }
    }
}

/// Volume-wide counters echoed in every reply so callers notice
/// structural changes even on a per-object NOT_MODIFIED.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeVersions {
    pub volume_version: u64,
    pub ug_version: u64,
    pub rg_version: u64,
    pub cert_version: u64,
}

/// Volume-signed answer to a resolve call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveReply {
    pub volume_id: VolumeId,
    pub file_id: FileId,
    pub versions: VolumeVersions,
    pub error: Option<ReplyError>,
    pub listing: Listing,
    pub signature: Vec<u8>,
}

impl_signed!(ResolveReply);

/// Volume-signed page of a directory's children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListdirReply {
    pub volume_id: VolumeId,
    pub file_id: FileId,
    pub versions: VolumeVersions,
    pub error: Option<ReplyError>,
    pub page_id: u32,
    pub entries: Vec<Entry>,
    /// Page to ask for next, if any children follow this page.
    pub next_page_id: Option<u32>,
    pub signature: Vec<u8>,
}

impl_signed!(ListdirReply);

/// Volume-signed answer to getxattr (`value`) and listxattr (`names`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XattrReply {
    pub volume_id: VolumeId,
    pub file_id: FileId,
    pub versions: VolumeVersions,
    pub error: Option<ReplyError>,
    pub value: Option<Vec<u8>>,
    pub names: Vec<String>,
    pub signature: Vec<u8>,
}

impl_signed!(XattrReply);

/// Fields of a new entry. The service assigns the id, owner and stamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    pub parent_id: FileId,
    pub name: String,
    pub ftype: EntryType,
    pub mode: u32,
    pub size: u64,
}

/// Attribute changes to an existing entry. `version` must not go backwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryPatch {
    pub file_id: FileId,
    pub version: i64,
    pub size: Option<u64>,
    pub mode: Option<u32>,
    pub owner_id: Option<OwnerId>,
}

/// `setxattr(2)` flags: fail if the attribute exists, or if it does not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum XattrMode {
    #[default]
    Any,
    Create,
    Replace,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryUpdate {
    Create(NewEntry),
    Update(EntryPatch),
    Delete { file_id: FileId },
    /// Make the sending gateway the file's coordinator.
    Chcoord { file_id: FileId },
    /// Move an entry to `new_name` under `new_parent_id`. Never overwrites.
    Rename {
        file_id: FileId,
        new_parent_id: FileId,
        new_name: String,
    },
    SetXattr {
        file_id: FileId,
        name: String,
        value: Vec<u8>,
        mode: XattrMode,
    },
    RemoveXattr { file_id: FileId, name: String },
}

/// Body of `POST /FILE/{volume_id}`, signed with the gateway's own key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataUpdates {
    pub volume_id: VolumeId,
    pub gateway_id: GatewayId,
    pub updates: Vec<EntryUpdate>,
    pub signature: Vec<u8>,
}

impl_signed!(MetadataUpdates);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpdateOutcome {
    Ok(Entry),
    Deleted(FileId),
    /// An extended attribute of this entry was set or removed.
    XattrChanged(FileId),
    Err(ReplyError),
}

/// Volume-signed answer to a batch of updates, one outcome per update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReply {
    pub volume_id: VolumeId,
    pub versions: VolumeVersions,
    pub results: Vec<UpdateOutcome>,
    pub signature: Vec<u8>,
}

impl_signed!(UpdateReply);
