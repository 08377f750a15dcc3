//! Versioned response cache.
//!
//! This module provides the `CacheStorage` and `Generation` traits the
//! offline manager is written against, plus two implementations:
//! - `MemoryStorage`: in-process, for tests and short-lived hosts
//! - `DiskStorage`: JSON metadata per generation plus raw body files under a
//!   cache directory
//!
//! Entries are keyed by method and URL, honour `Vary`, and are replaced
//! wholesale on every write.

pub mod disk;
pub mod entry;
pub mod memory;
pub mod request;
pub mod response;
pub mod store;

pub use disk::DiskStorage;
pub use entry::CacheEntry;
pub use memory::MemoryStorage;
pub use request::{FetchRequest, RequestKey};
pub use response::{Response, ResponseKind};
pub use store::{CacheStorage, Generation};
