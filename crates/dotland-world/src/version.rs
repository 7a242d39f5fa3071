//! Build versions and the client/server compatibility rule.
//!
//! A version string is exactly `"<major>.<minor>.<patch>"` with non-negative
//! base-10 components. Two builds may talk to each other iff their major
//! components are equal; minor and patch bumps are additive.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Version of this client build.
pub const CLIENT_VERSION: Version = Version::new(0, 1, 0);

/// Version of the API/protocol contract the server speaks.
pub const API_VERSION: Version = Version::new(0, 1, 0);

/// Semantic version triple. Immutable once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    major: u32,
    minor: u32,
    patch: u32,
}

/// Errors produced while parsing or comparing versions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VersionError {
    /// The string is not three dot-separated non-negative integers.
    #[error("malformed version string {0:?}")]
    Malformed(String),

    /// The two builds do not share a major version.
    #[error("version mismatch: server speaks {server}, client is {client}")]
    Mismatch {
        /// Server (API) version.
        server: Version,
        /// Client build version.
        client: Version,
    },
}

impl Version {
    /// Creates a version from its components.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Major component (breaking changes).
    pub const fn major(&self) -> u32 {
        self.major
    }

    /// Minor component (backwards-compatible additions).
    pub const fn minor(&self) -> u32 {
        self.minor
    }

    /// Patch component (fixes).
    pub const fn patch(&self) -> u32 {
        self.patch
    }

    /// Returns `true` if both versions share a major component.
    pub const fn is_compatible_with(&self, other: &Self) -> bool {
        self.major == other.major
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || VersionError::Malformed(s.to_string());

        let mut parts = s.split('.');
        let mut next = || -> Result<u32, VersionError> {
            let part = parts.next().ok_or_else(malformed)?;
            // u32::from_str accepts a leading '+', which the format forbids.
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed());
            }
            part.parse().map_err(|_| malformed())
        };

        let version = Version::new(next()?, next()?, next()?);
        if parts.next().is_some() {
            return Err(malformed());
        }
        Ok(version)
    }
}

/// Decides whether a client build may connect to a server build.
///
/// Fails with [`VersionError::Malformed`] if either string does not parse.
pub fn is_compatible(server_version: &str, client_version: &str) -> Result<bool, VersionError> {
    let server: Version = server_version.parse()?;
    let client: Version = client_version.parse()?;
    Ok(server.is_compatible_with(&client))
}

/// Like [`is_compatible`], but turns an incompatible pair into
/// [`VersionError::Mismatch`].
pub fn check_compatibility(
    server_version: &str,
    client_version: &str,
) -> Result<(), VersionError> {
    let server: Version = server_version.parse()?;
    let client: Version = client_version.parse()?;
    if server.is_compatible_with(&client) {
        Ok(())
    } else {
        Err(VersionError::Mismatch { server, client })
    }
}
