use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{BridgeError, ErrorCode, Result};

/// Packages whose removal would leave the system unable to manage packages
/// or boot.
pub const ESSENTIAL_PACKAGES: &[&str] = &[
    "dpkg",
    "apt",
    "apt-get",
    "libc6",
    "init",
    "systemd",
    "base-files",
    "base-passwd",
    "bash",
    "coreutils",
];

const MAX_NAME_LEN: usize = 255;

// safety: this regex is valid and tested
static PACKAGE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9+.\-]+$").expect("valid regex"));

/// Check a package name against Debian policy before it reaches apt-get's
/// argument list.
///
/// Names are at least two characters of lowercase letters, digits, `+`, `-`
/// and `.`, starting with a letter or digit. A leading `-` would otherwise be
/// read as an option.
pub fn validate_package_name(name: &str) -> Result<()> {
    let reason = if name.is_empty() {
        Some("Package name cannot be empty")
    } else if name.len() > MAX_NAME_LEN {
        Some("Package name is too long")
    } else if !PACKAGE_NAME.is_match(name) {
        Some("Package name contains invalid characters")
    } else {
        None
    };

    match reason {
        None => Ok(()),
        Some(reason) => Err(BridgeError::new(
            ErrorCode::InvalidPackageName,
            format!("Invalid package name: {name}"),
        )
        .with_details(reason)),
    }
}

/// Names refused by the `remove` pre-flight check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectedPackages(BTreeSet<String>);

impl Default for ProtectedPackages {
    fn default() -> Self {
        Self(ESSENTIAL_PACKAGES.iter().map(|s| s.to_string()).collect())
    }
}

impl ProtectedPackages {
    /// The essential packages plus `extra`.
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut set = Self::default();
        set.0.extend(extra.into_iter().map(Into::into));
        set
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn check_removable(&self, name: &str) -> Result<()> {
        if self.contains(name) {
            return Err(BridgeError::essential_package(name));
        }
        Ok(())
    }
}
