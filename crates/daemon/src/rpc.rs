//! Explicit table of RPCs and what a caller needs to invoke each one.

use common::caps::Capabilities;
use common::gateway::GatewayType;

use crate::auth::Caller;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rpc {
    Resolve,
    GetAttr,
    GetChild,
    ListDir,
    GetXattr,
    ListXattr,
    UpdateMetadata,
    DeleteEntry,
    GetCert,
    GetCertManifest,
}

#[derive(Debug, Clone, Copy)]
pub struct RpcSpec {
    pub rpc: Rpc,
    pub name: &'static str,
    /// Gateway types allowed to call. Empty means any type.
    pub gateway_types: &'static [GatewayType],
    pub caps: Capabilities,
    /// Whether a caller without credentials may invoke it on an
    /// anonymous-access volume.
    pub allow_anonymous: bool,
    /// Shape of the request body, for logs and errors.
    pub args: &'static str,
}

const READERS: &[GatewayType] = &[GatewayType::User];
const WRITERS: &[GatewayType] = &[GatewayType::User, GatewayType::Acquisition];

pub const RPC_TABLE: &[RpcSpec] = &[
    RpcSpec {
        rpc: Rpc::Resolve,
        name: "resolve",
        gateway_types: READERS,
        caps: Capabilities::READ_METADATA,
        allow_anonymous: true,
        args: "volume_id, file_id, file_version, write_nonce",
    },
    RpcSpec {
        rpc: Rpc::GetAttr,
        name: "getattr",
        gateway_types: READERS,
        caps: Capabilities::READ_METADATA,
        allow_anonymous: true,
        args: "volume_id, file_id, file_version, write_nonce",
    },
    RpcSpec {
        rpc: Rpc::GetChild,
        name: "getchild",
        gateway_types: READERS,
        caps: Capabilities::READ_METADATA,
        allow_anonymous: true,
        args: "volume_id, parent_id, name",
    },
    RpcSpec {
        rpc: Rpc::ListDir,
        name: "listdir",
        gateway_types: READERS,
        caps: Capabilities::READ_METADATA,
        allow_anonymous: true,
        args: "volume_id, file_id, page_id",
    },
    RpcSpec {
        rpc: Rpc::GetXattr,
        name: "getxattr",
        gateway_types: READERS,
        caps: Capabilities::READ_METADATA,
        allow_anonymous: true,
        args: "volume_id, file_id, name",
    },
    RpcSpec {
        rpc: Rpc::ListXattr,
        name: "listxattr",
        gateway_types: READERS,
        caps: Capabilities::READ_METADATA,
        allow_anonymous: true,
        args: "volume_id, file_id",
    },
    RpcSpec {
        rpc: Rpc::UpdateMetadata,
        name: "update_metadata",
        gateway_types: WRITERS,
        caps: Capabilities::WRITE_METADATA,
        allow_anonymous: false,
        args: "signed MetadataUpdates",
    },
    RpcSpec {
        rpc: Rpc::DeleteEntry,
        name: "delete_entry",
        gateway_types: WRITERS,
        caps: Capabilities::WRITE_METADATA,
        allow_anonymous: false,
        args: "volume_id, file_id",
    },
    RpcSpec {
        rpc: Rpc::GetCert,
        name: "get_cert",
        gateway_types: &[],
        caps: Capabilities::empty(),
        allow_anonymous: true,
        args: "volume_id, cert_version, gateway_type, gateway_id",
    },
    RpcSpec {
        rpc: Rpc::GetCertManifest,
        name: "get_cert_manifest",
        gateway_types: &[],
        caps: Capabilities::empty(),
        allow_anonymous: true,
        args: "volume_id, version",
    },
];

impl Rpc {
    pub fn spec(self) -> &'static RpcSpec {
        // Every variant has exactly one row; see test_every_rpc_has_a_row.
        RPC_TABLE
            .iter()
            .find(|spec| spec.rpc == self)
            .unwrap_or(&RPC_TABLE[0])
    }

    pub fn by_name(name: &str) -> Option<Rpc> {
        RPC_TABLE
            .iter()
            .find(|spec| spec.name == name)
            .map(|spec| spec.rpc)
    }
}

/// Check `caller` against the table row of `rpc`. Runs before the handler.
pub fn authorize(rpc: Rpc, caller: &Caller) -> Result<()> {
    let spec = rpc.spec();
    let Some(gateway) = caller.gateway() else {
        if spec.allow_anonymous {
            return Ok(());
        }
        return Err(Error::Forbidden(format!(
            "{} requires an authenticated gateway",
            spec.name
        )));
    };

    if !spec.gateway_types.is_empty() && !spec.gateway_types.contains(&gateway.gateway_type()) {
        return Err(Error::Forbidden(format!(
            "{} gateways may not call {}",
            gateway.gateway_type(),
            spec.name
        )));
    }
    if !gateway.caps().allows(spec.caps) {
        return Err(Error::Forbidden(format!(
            "gateway {} lacks capabilities for {}",
            gateway.id(),
            spec.name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::crypto::SecretKey;
    use common::gateway::{Gateway, GatewayCert};

    fn caller(gateway_type: GatewayType, caps: Capabilities) -> Caller {
        Caller::Gateway(Box::new(Gateway {
            cert: GatewayCert {
                gateway_id: 5,
                gateway_type,
                volume_id: 1,
                owner_id: 1,
                name: "gw".to_string(),
                public_key: SecretKey::generate().public(),
                caps,
                cert_version: 1,
                signature: Vec::new(),
            },
            session: None,
            sealed_private_key: None,
        }))
    }

    #[test]
    fn test_every_rpc_has_a_row() {
        for rpc in [
            Rpc::Resolve,
            Rpc::GetAttr,
            Rpc::GetChild,
            Rpc::ListDir,
            Rpc::GetXattr,
            Rpc::ListXattr,
            Rpc::UpdateMetadata,
            Rpc::DeleteEntry,
            Rpc::GetCert,
            Rpc::GetCertManifest,
        ] {
            assert_eq!(RPC_TABLE.iter().filter(|s| s.rpc == rpc).count(), 1);
            assert_eq!(Rpc::by_name(rpc.spec().name), Some(rpc));
        }
    }

    #[test]
    fn test_resolve_requires_read_metadata() {
        assert!(authorize(
            Rpc::Resolve,
            &caller(GatewayType::User, Capabilities::READ_METADATA)
        )
        .is_ok());
        assert!(matches!(
            authorize(Rpc::Resolve, &caller(GatewayType::User, Capabilities::READ_DATA)),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            authorize(Rpc::Resolve, &caller(GatewayType::Replica, Capabilities::all())),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_anonymous_callers() {
        assert!(authorize(Rpc::Resolve, &Caller::Anonymous).is_ok());
        assert!(authorize(Rpc::GetCertManifest, &Caller::Anonymous).is_ok());
        assert!(authorize(Rpc::ListDir, &Caller::Anonymous).is_ok());
        assert!(matches!(
            authorize(Rpc::UpdateMetadata, &Caller::Anonymous),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn test_writers() {
        let caps = Capabilities::WRITE_METADATA;
        assert!(authorize(Rpc::UpdateMetadata, &caller(GatewayType::Acquisition, caps)).is_ok());
        assert!(authorize(Rpc::DeleteEntry, &caller(GatewayType::User, caps)).is_ok());
        assert!(authorize(Rpc::DeleteEntry, &caller(GatewayType::Replica, caps)).is_err());
        assert!(authorize(Rpc::GetCert, &caller(GatewayType::Replica, Capabilities::empty())).is_ok());
    }
}
