//! Debounce queue for edit notifications.
//!
//! One entry per entity id currently being reconciled; presence of an
//! entry is itself the "processing" signal. A notification that
//! arrives while an entry exists sets the entry's reprocess flag
//! instead of starting a second pass, so reconciliation for a given
//! id is strictly serialized and no edit is silently dropped.
//!
//! The table is in-memory and process-local by design: grants in the
//! remote store are idempotent, so losing the table in a crash costs
//! only temporary staleness, never corruption.

use std::collections::HashMap;
use std::sync::Mutex;

use directory::EntityId;

/// Injectable seam over the debounce table so tests can substitute
/// their own implementation.
pub trait WorkTable: Send + Sync {
    /// Returns true if the caller now owns reconciliation for `id`.
    /// Returns false if a pass is already in flight; the in-flight
    /// owner is then guaranteed a follow-up pass.
    fn enqueue(&self, id: &EntityId) -> bool;

    /// Marks the owner's pass finished. Returns true if an edit
    /// arrived mid-pass and another pass is required (the flag is
    /// cleared, ownership is retained); returns false once the entry
    /// is removed and the id is idle again.
    fn complete(&self, id: &EntityId) -> bool;
}

#[derive(Default)]
struct QueueEntry {
    reprocess_requested: bool,
}

#[derive(Default)]
pub struct InMemoryWorkTable {
    entries: Mutex<HashMap<EntityId, QueueEntry>>,
}

impl InMemoryWorkTable {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl WorkTable for InMemoryWorkTable {
    fn enqueue(&self, id: &EntityId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(id) {
            Some(entry) => {
                entry.reprocess_requested = true;
                false
            }
            None => {
                entries.insert(id.clone(), QueueEntry::default());
                true
            }
        }
    }

    fn complete(&self, id: &EntityId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get_mut(id) {
            Some(entry) if entry.reprocess_requested => {
                entry.reprocess_requested = false;
                true
            }
            Some(_) => {
                entries.remove(id);
                false
            }
            // Unknown id: nothing in flight, nothing to do.
            None => false,
        }
    }
}
