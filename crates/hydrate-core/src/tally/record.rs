use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::KeyValueStore;

/// Key for today's record
pub const DATA_KEY: &str = "hydrateData";

/// Key for the list of previous days
pub const HISTORY_KEY: &str = "hydrateHistory";

/// Days of history retained. Older records are dropped on rollover.
const HISTORY_LIMIT: usize = 365;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRecord {
    pub date: NaiveDate,
    pub count: u32,
}

impl DayRecord {
    pub fn new(date: NaiveDate) -> Self {
        Self { date, count: 0 }
    }
}

/// Today's counter, backed by a key-value store.
pub struct Tally<S: KeyValueStore> {
    store: S,
    current: DayRecord,
}

impl<S: KeyValueStore> Tally<S> {
    /// Load today's record, rolling over if the stored one is from another day.
    pub fn open(store: S, today: NaiveDate) -> Result<Self> {
        let stored: Option<DayRecord> = read_json(&store, DATA_KEY)?;
        let mut tally = Self {
            store,
            current: stored.unwrap_or_else(|| DayRecord::new(today)),
        };
        if tally.current.date != today {
            tally.roll_to(today)?;
        } else {
            tally.save()?;
        }
        Ok(tally)
    }

    /// Archive the current record and start `today` at zero.
    pub fn roll_to(&mut self, today: NaiveDate) -> Result<()> {
        if self.current.date == today {
            return Ok(());
        }
        debug!(from = %self.current.date, to = %today, "Rolling tally over to new day");
        self.archive(self.current)?;
        self.current = DayRecord::new(today);
        self.save()
    }

    pub fn record(&self) -> DayRecord {
        self.current
    }

    pub fn count(&self) -> u32 {
        self.current.count
    }

    pub fn increment(&mut self) -> Result<u32> {
        self.current.count = self.current.count.saturating_add(1);
        self.save()?;
        Ok(self.current.count)
    }

    /// Never goes below zero.
    pub fn decrement(&mut self) -> Result<u32> {
        self.current.count = self.current.count.saturating_sub(1);
        self.save()?;
        Ok(self.current.count)
    }

    pub fn reset(&mut self) -> Result<()> {
        self.current.count = 0;
        self.save()
    }

    /// Previous days, oldest first. Today is not included.
    pub fn history(&self) -> Result<Vec<DayRecord>> {
        Ok(read_json(&self.store, HISTORY_KEY)?.unwrap_or_default())
    }

    pub fn into_store(self) -> S {
        self.store
    }

    fn save(&mut self) -> Result<()> {
        let value = serde_json::to_string(&self.current)?;
        self.store.set(DATA_KEY, value)
    }

    fn archive(&mut self, record: DayRecord) -> Result<()> {
        let mut history = self.history()?;
        match history.iter_mut().find(|r| r.date == record.date) {
            Some(existing) => *existing = record,
            None => history.push(record),
        }
        history.sort_by_key(|r| r.date);
        if history.len() > HISTORY_LIMIT {
            let excess = history.len() - HISTORY_LIMIT;
            history.drain(..excess);
        }
        self.store.set(HISTORY_KEY, serde_json::to_string(&history)?)
    }
}

/// Unreadable values are logged and treated as absent.
fn read_json<S, T>(store: &S, key: &str) -> Result<Option<T>>
where
    S: KeyValueStore,
    T: serde::de::DeserializeOwned,
{
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            warn!(key, error = %e, "Ignoring unreadable stored value");
            Ok(None)
        }
    }
}
