//! Protocol versioning for Parley.
//!
//! Clients may announce the version they speak in the handshake
//! (`?version=1.0`); the server accepts any version with the same major.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::codec::ProtocolError;

/// Current protocol version.
pub const PROTOCOL_VERSION: Version = Version { major: 1, minor: 0 };

/// Protocol version information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Major version - breaking changes increment this.
    pub major: u8,
    /// Minor version - backwards-compatible changes increment this.
    pub minor: u8,
}

impl Version {
    /// Create a new version.
    #[must_use]
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Check if this version is compatible with another version.
    ///
    /// Versions are compatible if they share the same major version.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }

    /// Negotiate the version to speak with a client.
    ///
    /// Returns the lower of the two versions when compatible.
    #[must_use]
    pub fn negotiate(&self, client: &Version) -> Option<Version> {
        if !self.is_compatible_with(client) {
            return None;
        }
        Some(Version::new(self.major, self.minor.min(client.minor)))
    }
}

impl FromStr for Version {
    type Err = ProtocolError;

    /// Parse `"1"` or `"1.2"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ProtocolError::Invalid(format!("invalid protocol version '{s}'"));
        let mut parts = s.trim().splitn(2, '.');
        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let minor = match parts.next() {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 0,
        };
        Ok(Version::new(major, minor))
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl Default for Version {
    fn default() -> Self {
        PROTOCOL_VERSION
    }
}
