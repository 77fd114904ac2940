//! ID types for players and monsters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Stable, store-assigned identifier for a player (avatar).
///
/// Doubles as the owner field of a chunk, so it carries two sentinel
/// values: [`PlayerId::NONE`] marks an unclaimed chunk and
/// [`PlayerId::RESERVED`] a chunk that is claimable in principle but
/// administratively held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlayerId(u32);

impl PlayerId {
    /// Unclaimed / no owner.
    pub const NONE: Self = Self(0);

    /// Administratively reserved; claimable only through admin action.
    pub const RESERVED: Self = Self(u32::MAX);

    /// Creates a player ID from a raw value.
    #[must_use]
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// True for IDs that denote an actual player, not a sentinel.
    #[must_use]
    pub const fn is_real(self) -> bool {
        self.0 != Self::NONE.0 && self.0 != Self::RESERVED.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NONE => write!(f, "none"),
            Self::RESERVED => write!(f, "reserved"),
            Self(id) => write!(f, "{id}"),
        }
    }
}

/// Process-wide counter for monster IDs. Monsters are not persisted, so
/// their IDs only need to be unique within one server run.
static MONSTER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a live monster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MonsterId(u64);

impl MonsterId {
    /// Allocates a new unique monster ID.
    #[must_use]
    pub fn new() -> Self {
        Self(MONSTER_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl Default for MonsterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MonsterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m{}", self.0)
    }
}
