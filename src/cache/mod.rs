//! Caching layer for tvcache.
//!
//! - `entry`: keys, tables and stored entries
//! - `store`: the storage trait plus bounded reads and background writes
//! - `mongo` / `memory`: the two store backends
//! - `resolver`: cache-aside lookups with stale fallback

pub mod entry;
pub mod memory;
pub mod mongo;
pub mod resolver;
pub mod store;

pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use resolver::CacheAside;
pub use store::SharedStore;
