//! Append-only, capacity-bounded sequences for step results and events.

use crate::{Event, StepResult};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Fixed-capacity ring of entries; the oldest entry is evicted when full.
///
/// Entries are never handed out mutably, so history cannot be rewritten after
/// it is appended.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BoundedLog<T> {
    capacity: usize,
    entries: VecDeque<T>,
}

/// Most recent transition events.
pub type EventLog = BoundedLog<Event>;
/// Most recent per-step results.
pub type SeriesAccumulator = BoundedLog<StepResult>;

impl<T> BoundedLog<T> {
    /// A log holding at most `capacity` entries (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append an entry, returning the evicted one if the log was full.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Clone> BoundedLog<T> {
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for BoundedLog<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Raw<U> {
            capacity: usize,
            entries: VecDeque<U>,
        }

        let raw = Raw::<T>::deserialize(deserializer)?;
        if raw.capacity == 0 {
            return Err(de::Error::custom("log capacity must be > 0"));
        }
        if raw.entries.len() > raw.capacity {
            return Err(de::Error::custom(format!(
                "{} entries exceed log capacity {}",
                raw.entries.len(),
                raw.capacity
            )));
        }
        Ok(Self {
            capacity: raw.capacity,
            entries: raw.entries,
        })
    }
}

impl<T> Extend<T> for BoundedLog<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for entry in iter {
            self.push(entry);
        }
    }
}
