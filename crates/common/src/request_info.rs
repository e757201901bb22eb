//! Verified view of a block or manifest request.
//!
//! Replica and client gateways address data objects with
//!
//! ```text
//! /SYNDICATE-DATA/{volume_id}/{file_id_hex}.{file_version}/{block_id}.{block_version}
//! /SYNDICATE-DATA/{volume_id}/{file_id_hex}.{file_version}/manifest.{mtime_sec}.{mtime_nsec}
//! ```
//!
//! A [`RequestInfo`] is built either from such a path or from a signed
//! [`DataRequest`], and lives only as long as the request it describes.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::entry::FileId;
use crate::gateway::GatewayId;
use crate::impl_signed;
use crate::signed::{EnvelopeError, Signed};
use crate::time::Timestamp;
use crate::user::OwnerId;
use crate::volume::VolumeId;

pub const DATA_PREFIX: &str = "/SYNDICATE-DATA";

static DATA_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^/SYNDICATE-DATA/(?P<volume>[0-9]+)/(?P<file>[0-9A-Fa-f]+)\.(?P<fver>-?[0-9]+)/(?:manifest\.(?P<sec>-?[0-9]+)\.(?P<nsec>[0-9]+)|(?P<block>[0-9]+)\.(?P<bver>-?[0-9]+))$",
    )
    .expect("data path pattern is valid")
});

#[derive(Debug, thiserror::Error)]
pub enum RequestInfoError {
    #[error("path does not match the data object grammar: {0}")]
    BadPath(String),
    #[error("numeric field out of range: {0}")]
    OutOfRange(&'static str),
    #[error("request names neither a block nor a manifest")]
    MissingTarget,
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestType {
    Block,
    Manifest,
}

/// What a data request points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataTarget {
    Block { block_id: u64, block_version: i64 },
    Manifest { mtime: Timestamp },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub request_type: RequestType,
    pub volume_id: VolumeId,
    pub gateway_id: Option<GatewayId>,
    pub user_id: Option<OwnerId>,
    pub file_id: FileId,
    pub file_version: i64,
    pub target: DataTarget,
    pub hash: Option<Vec<u8>>,
    pub size: Option<u64>,
}

/// Signed, structured alternative to the URL form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    pub volume_id: VolumeId,
    pub gateway_id: GatewayId,
    pub user_id: OwnerId,
    pub file_id: FileId,
    pub file_version: i64,
    pub target: DataTarget,
    pub hash: Vec<u8>,
    pub size: u64,
    pub signature: Vec<u8>,
}

impl_signed!(DataRequest);

fn field<T: std::str::FromStr>(
    caps: &regex::Captures<'_>,
    name: &'static str,
) -> Result<T, RequestInfoError> {
    caps.name(name)
        .ok_or(RequestInfoError::MissingTarget)?
        .as_str()
        .parse()
        .map_err(|_| RequestInfoError::OutOfRange(name))
}

impl RequestInfo {
    pub fn from_url_path(path: &str) -> Result<Self, RequestInfoError> {
        let caps = DATA_PATH
            .captures(path)
            .ok_or_else(|| RequestInfoError::BadPath(path.to_string()))?;

        let file_id = u64::from_str_radix(&caps["file"], 16)
            .map_err(|_| RequestInfoError::OutOfRange("file_id"))?;

        let (request_type, target) = if caps.name("sec").is_some() {
            let nsec: i32 = field(&caps, "nsec")?;
            if nsec >= 1_000_000_000 {
                return Err(RequestInfoError::OutOfRange("nsec"));
            }
            (
                RequestType::Manifest,
                DataTarget::Manifest {
                    mtime: Timestamp::new(field(&caps, "sec")?, nsec),
                },
            )
        } else {
            (
                RequestType::Block,
                DataTarget::Block {
                    block_id: field(&caps, "block")?,
                    block_version: field(&caps, "bver")?,
                },
            )
        };

        Ok(Self {
            request_type,
            volume_id: field(&caps, "volume")?,
            gateway_id: None,
            user_id: None,
            file_id,
            file_version: field(&caps, "fver")?,
            target,
            hash: None,
            size: None,
        })
    }

    /// Verify `message` with the sending gateway's key and lift it.
    pub fn from_signed_message(
        message: &DataRequest,
        gateway_key: &PublicKey,
    ) -> Result<Self, RequestInfoError> {
        message.verify_with(gateway_key)?;
        let request_type = match message.target {
            DataTarget::Block { .. } => RequestType::Block,
            DataTarget::Manifest { .. } => RequestType::Manifest,
        };
        Ok(Self {
            request_type,
            volume_id: message.volume_id,
            gateway_id: Some(message.gateway_id),
            user_id: Some(message.user_id),
            file_id: message.file_id,
            file_version: message.file_version,
            target: message.target,
            hash: Some(message.hash.clone()),
            size: Some(message.size),
        })
    }

    pub fn to_url_path(&self) -> String {
        let prefix = format!(
            "{}/{}/{:X}.{}",
            DATA_PREFIX, self.volume_id, self.file_id, self.file_version
        );
        match self.target {
            DataTarget::Block {
                block_id,
                block_version,
            } => format!("{prefix}/{block_id}.{block_version}"),
            DataTarget::Manifest { mtime } => {
                format!("{prefix}/manifest.{}.{}", mtime.sec, mtime.nsec)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecretKey;

    #[test]
    fn test_parse_block_path() {
        let info = RequestInfo::from_url_path("/SYNDICATE-DATA/12/1aF.3/7.42").unwrap();
        assert_eq!(info.request_type, RequestType::Block);
        assert_eq!(info.volume_id, 12);
        assert_eq!(info.file_id, 0x1af);
        assert_eq!(info.file_version, 3);
        assert_eq!(
            info.target,
            DataTarget::Block {
                block_id: 7,
                block_version: 42
            }
        );
        assert_eq!(info.to_url_path(), "/SYNDICATE-DATA/12/1AF.3/7.42");
    }

    #[test]
    fn test_parse_manifest_path() {
        let info =
            RequestInfo::from_url_path("/SYNDICATE-DATA/1/ff.2/manifest.1700000000.500").unwrap();
        assert_eq!(info.request_type, RequestType::Manifest);
        assert_eq!(info.file_id, 255);
        assert_eq!(
            info.target,
            DataTarget::Manifest {
                mtime: Timestamp::new(1_700_000_000, 500)
            }
        );
    }

    #[test]
    fn test_rejects_malformed_paths() {
        for path in [
            "/SYNDICATE-DATA/1/ff/7.42",
            "/SYNDICATE-DATA/x/ff.1/7.42",
            "/SYNDICATE-DATA/1/zz.1/7.42",
            "/SYNDICATE-DATA/1/ff.1/manifest.1",
            "/OTHER/1/ff.1/7.42",
            "/SYNDICATE-DATA/1/ff.1/7.42/extra",
        ] {
            assert!(
                matches!(
                    RequestInfo::from_url_path(path),
                    Err(RequestInfoError::BadPath(_))
                ),
                "{path} should not parse"
            );
        }
        assert!(matches!(
            RequestInfo::from_url_path("/SYNDICATE-DATA/1/ff.1/manifest.1.1000000000"),
            Err(RequestInfoError::OutOfRange("nsec"))
        ));
        assert!(matches!(
            RequestInfo::from_url_path("/SYNDICATE-DATA/1/fffffffffffffffff.1/1.1"),
            Err(RequestInfoError::OutOfRange("file_id"))
        ));
    }

    #[test]
    fn test_from_signed_message() {
        let key = SecretKey::generate();
        let message = DataRequest {
            volume_id: 4,
            gateway_id: 9,
            user_id: 2,
            file_id: 77,
            file_version: 1,
            target: DataTarget::Block {
                block_id: 0,
                block_version: 5,
            },
            hash: vec![1, 2, 3],
            size: 4096,
            signature: Vec::new(),
        }
        .signed_with(&key)
        .unwrap();

        let info = RequestInfo::from_signed_message(&message, &key.public()).unwrap();
        assert_eq!(info.gateway_id, Some(9));
        assert_eq!(info.size, Some(4096));

        let other = SecretKey::generate();
        assert!(RequestInfo::from_signed_message(&message, &other.public()).is_err());
    }
}
