//! Daily tally persisted in an origin-scoped key-value store.
//!
//! Today's count lives under `hydrateData` as `{"date": "YYYY-MM-DD",
//! "count": n}`. When the stored date is not today, the old record moves to
//! the `hydrateHistory` list and the count starts over at zero.

pub mod record;
pub mod store;

pub use record::{DayRecord, Tally, DATA_KEY, HISTORY_KEY};
pub use store::{FileStore, KeyValueStore, MemoryStore};
