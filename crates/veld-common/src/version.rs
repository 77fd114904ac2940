//! Version types for schema compatibility.

use serde::{Deserialize, Serialize};

/// Schema version using semantic versioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Major version (breaking changes)
    pub major: u16,
    /// Minor version (backwards-compatible additions)
    pub minor: u16,
    /// Patch version (bug fixes)
    pub patch: u16,
}

impl SchemaVersion {
    /// Creates a new schema version.
    #[must_use]
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Current chunk file version.
    pub const CHUNK_FILE: Self = Self::new(1, 0, 0);

    /// Current player record version.
    pub const PLAYER_RECORD: Self = Self::new(1, 0, 0);

    /// Checks if this version can read data written by another version.
    #[must_use]
    pub const fn can_read(&self, data_version: &Self) -> bool {
        self.major == data_version.major
    }
}

impl std::fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Magic bytes for file format identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MagicBytes(pub [u8; 4]);

impl MagicBytes {
    /// Veld chunk file magic bytes.
    pub const CHUNK: Self = Self(*b"VLCH");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_read_same_major() {
        let reader = SchemaVersion::new(1, 2, 0);
        assert!(reader.can_read(&SchemaVersion::new(1, 0, 3)));
        assert!(!reader.can_read(&SchemaVersion::new(2, 0, 0)));
    }
}
