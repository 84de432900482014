//! Idempotency and status ledger
//!
//! Maps each idempotency key to the current or final state of its request. The
//! first writer for a key claims it atomically; every later submission with the
//! same key is answered from the ledger.
//!
//! Entries are never evicted, so the ledger grows for the lifetime of the process.

use dashmap::{DashMap, mapref::entry::Entry};

use crate::types::{DeliveryState, IdempotencyKey, StatusRecord};

#[derive(Debug, Default)]
pub struct Ledger {
    entries: DashMap<IdempotencyKey, StatusRecord>,
}

impl Ledger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` for a new request.
    ///
    /// `decide` runs only when the key is unseen, while the entry is still
    /// locked, and picks the initial state. Returns the existing record if the key
    /// was seen before.
    ///
    /// # Errors
    ///
    /// Returns the existing [`StatusRecord`] when `key` is already present
    pub fn claim_with<F>(&self, key: &IdempotencyKey, decide: F) -> Result<DeliveryState, StatusRecord>
    where
        F: FnOnce() -> DeliveryState,
    {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(existing) => Err(existing.get().clone()),
            Entry::Vacant(vacant) => {
                let state = decide();
                vacant.insert(StatusRecord::new(state));
                Ok(state)
            }
        }
    }

    /// Overwrite the record for `key`
    pub fn record(&self, key: &IdempotencyKey, record: StatusRecord) {
        self.entries.insert(key.clone(), record);
    }

    pub fn get(&self, key: &str) -> Option<StatusRecord> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Keys tracked so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
