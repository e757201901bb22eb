use std::fmt;

/// Logical record families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Users,
    UserNames,
    Volumes,
    VolumeNames,
    Gateways,
    GatewayNames,
    CertBundles,
    Entries,
    NameHolders,
    Xattrs,
    Shards,
    ShardConfigs,
    Counters,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::UserNames => "user_names",
            Table::Volumes => "volumes",
            Table::VolumeNames => "volume_names",
            Table::Gateways => "gateways",
            Table::GatewayNames => "gateway_names",
            Table::CertBundles => "cert_bundles",
            Table::Entries => "entries",
            Table::NameHolders => "name_holders",
            Table::Xattrs => "xattrs",
            Table::Shards => "shards",
            Table::ShardConfigs => "shard_configs",
            Table::Counters => "counters",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
