use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;

pub type OwnerId = u64;

/// A registered user. Users own volumes, gateways and entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub owner_id: OwnerId,
    pub username: String,
    pub public_key: PublicKey,
    pub is_admin: bool,
}
