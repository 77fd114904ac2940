//! # Veld Gameplay
//!
//! Gameplay systems over the world core:
//! - Player sessions, records, and the account/ID collaborator (`player`)
//! - The concurrent player registry (`registry`)
//! - The spatial proximity index (`spatial`)
//! - Territory claim/grant/revert and activator triggers (`territory`)
//! - The live monster set and its simulation (`monster`)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod monster;
pub mod player;
pub mod registry;
pub mod spatial;
pub mod territory;

pub use monster::{Monster, MonsterSet};
pub use player::{ConnState, Player, PlayerRecord, PlayerStore};
pub use registry::PlayerRegistry;
pub use spatial::{EntityRef, SpatialIndex};
pub use territory::TerritoryManager;
