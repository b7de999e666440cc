//! In-memory implementations of the collaborator traits.
//!
//! Available backends:
//! - `MemoryContentStore` - artifact storage for tests and single-process runs
//! - `MemoryBus` - broadcast message bus

pub mod memory;

pub use memory::{MemoryBus, MemoryContentStore};
