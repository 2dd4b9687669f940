//! Guide storage abstraction for EPG sync.
//!
//! This module provides the narrow channel/program interface the sync engine
//! writes through, two backends (in-memory and SQLite), and a registry for
//! resolving a backend by name.
//!
//! # Design Principles
//! - Identity-preserving upserts: channels are keyed by external id per input
//! - Ids are never reused once assigned
//! - A program write set for one channel is applied as a unit

pub mod memory;
pub mod registry;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use registry::{create_default_registry, StoreFactory, StoreRegistry};
pub use sqlite::SqliteStore;
pub use store::{ChannelMap, ProgramWrites, Store};
