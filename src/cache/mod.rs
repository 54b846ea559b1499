//! Local cache layer: per-group stores with expiration, LRU byte budget
//! and single-flight fills.

pub mod group;
pub mod store;

pub use group::{Getter, Group, GroupRegistry, GroupStats};
pub use store::{CacheEntry, CacheStore, Filled};
