//! Protocol versioning for Parley.
//!
//! A client announces its major version in `connect`; the relay accepts
//! any client with the same major version.

use serde::{Deserialize, Serialize};

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

    /// Versions are compatible if they share the same major version.
    #[must_use]
    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }

    /// Check the major version a client sent in `connect`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::IncompatibleVersion`] on a major mismatch.
    pub fn accept_client(&self, client_major: u8) -> Result<(), ProtocolError> {
        if client_major == self.major {
            Ok(())
        } else {
            Err(ProtocolError::IncompatibleVersion {
                client: client_major,
                relay: self.major,
            })
        }
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
