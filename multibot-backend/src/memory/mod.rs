//! Identity namespacing for the long-term memory subsystem.

mod namespace;

pub use namespace::{MemoryLayer, MemoryNamespaceInjector};
