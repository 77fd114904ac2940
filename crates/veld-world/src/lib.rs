//! # Veld World
//!
//! World-state infrastructure for the Veld server:
//! - Chunk data model with ownership and activator triggers (`chunk`)
//! - Persistence collaborators (`store`)
//! - The in-memory chunk cache behind the World-domain lock (`cache`)
//! - Autosave and purge maintenance passes (`maintenance`)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod cache;
pub mod chunk;
pub mod maintenance;
pub mod store;

pub use cache::{CachedChunk, ChunkCache};
pub use chunk::Chunk;
pub use store::{ChunkStore, FileChunkStore, MemoryChunkStore};
