//! # Veld Common
//!
//! Shared foundations for the Veld world server:
//! - Coordinate types (chunk, local, world positions)
//! - ID types with ownership sentinels
//! - Schema versions and file magic bytes
//! - Common error types
//! - The lock-hierarchy discipline (`locks`)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod coords;
pub mod error;
pub mod ids;
pub mod locks;
pub mod version;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::coords::*;
    pub use crate::error::*;
    pub use crate::ids::*;
    pub use crate::locks::{Domain, OrderedMutex, OrderedRwLock};
    pub use crate::version::*;
}

pub use prelude::*;

#[cfg(test)]
mod tests {
    use super::*;
    use glam::DVec3;

    #[test]
    fn test_world_to_chunk_conversion() {
        let pos = DVec3::new(40.0, -1.0, 70.0);
        let cc = ChunkCoord::from_world(pos);
        assert_eq!(cc, ChunkCoord::new(1, -1, 2));
    }

    #[test]
    fn test_owner_sentinels() {
        assert!(!PlayerId::NONE.is_real());
        assert!(!PlayerId::RESERVED.is_real());
        assert!(PlayerId::from_raw(7).is_real());
    }
}
