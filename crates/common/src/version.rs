use std::fmt;

use serde::{Deserialize, Serialize};

/// Build metadata reported by `/_status/version` and `syndicate-ms version`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub name: String,
    pub version: String,
    pub build_profile: String,
}

impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.name, self.version, self.build_profile)
    }
}

/// Capture the calling crate's package name and version.
///
/// A macro rather than a function so that `env!` expands in the caller's
/// compile environment instead of this crate's.
#[macro_export]
macro_rules! build_info {
    () => {
        $crate::version::BuildInfo {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            build_profile: if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "release".to_string()
            },
        }
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_build_info_uses_caller_package() {
        let info = crate::build_info!();
        assert_eq!(info.name, "syndicate-common");
        assert!(info.to_string().starts_with("syndicate-common "));
    }
}
