use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Capability bits carried in a gateway certificate.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct Capabilities: u32 {
        const READ_DATA = 1;
        const WRITE_DATA = 1 << 1;
        const READ_METADATA = 1 << 2;
        const WRITE_METADATA = 1 << 3;
        const COORDINATE = 1 << 4;
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown capability: {0}")]
pub struct UnknownCapability(pub String);

impl Capabilities {
    /// True iff every bit in `required` is granted.
    pub fn allows(self, required: Capabilities) -> bool {
        self.contains(required)
    }

    /// Parse a comma separated list such as `read_metadata,write_metadata`.
    ///
    /// Names are case-insensitive and `-` is accepted in place of `_`.
    /// `all` and `none` are accepted as shorthands.
    pub fn parse_list(list: &str) -> Result<Self, UnknownCapability> {
        let mut caps = Capabilities::empty();
        for part in list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let name = part.to_ascii_uppercase().replace('-', "_");
            match name.as_str() {
                "ALL" => caps |= Capabilities::all(),
                "NONE" => {}
                _ => {
                    caps |= Capabilities::from_name(&name)
                        .ok_or_else(|| UnknownCapability(part.to_string()))?
                }
            }
        }
        Ok(caps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_requires_every_bit() {
        let caps = Capabilities::READ_METADATA | Capabilities::READ_DATA;
        assert!(caps.allows(Capabilities::READ_METADATA));
        assert!(caps.allows(Capabilities::empty()));
        assert!(!caps.allows(Capabilities::READ_METADATA | Capabilities::WRITE_METADATA));
    }

    #[test]
    fn test_parse_list() {
        let caps = Capabilities::parse_list("read-metadata, WRITE_METADATA").unwrap();
        assert_eq!(caps, Capabilities::READ_METADATA | Capabilities::WRITE_METADATA);
        assert_eq!(Capabilities::parse_list("all").unwrap(), Capabilities::all());
        assert_eq!(Capabilities::parse_list("").unwrap(), Capabilities::empty());
        assert!(Capabilities::parse_list("read_everything").is_err());
    }
}
