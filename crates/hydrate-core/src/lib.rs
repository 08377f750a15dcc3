//! Hydrate Dial core - offline cache lifecycle for the daily tally app.
//!
//! The [`OfflineCacheManager`] owns the install / activate / fetch lifecycle
//! for one origin, written against the [`CacheStorage`] and [`Network`]
//! traits so hosts and tests can supply their own store and transport.

pub mod cache;
pub mod config;
pub mod error;
pub mod manager;
pub mod manifest;
pub mod network;
pub mod tally;

pub use cache::{CacheStorage, DiskStorage, FetchRequest, Generation, MemoryStorage, Response, ResponseKind};
pub use config::Config;
pub use error::{OfflineError, Result};
pub use manager::{FetchOutcome, FetchSource, HostSignal, OfflineCacheManager, Phase, ROOT_DOCUMENT};
pub use manifest::AssetManifest;
pub use network::{HttpNetwork, Network};
pub use tally::{DayRecord, FileStore, KeyValueStore, Tally};
