//! Per-identifier accounting windows and the store that owns them.

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::policy::Policy;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// One identifier's current fixed accounting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEntry {
    /// Requests admitted in the current window
    pub count: u32,
    /// Epoch milliseconds at which the window expires
    pub reset_at: u64,
}

impl WindowEntry {
    /// Open a fresh window at `now`, counting the request that opened it.
    pub fn open(policy: &Policy, now: u64) -> Self {
        Self {
            count: 1,
            reset_at: now.saturating_add(policy.window_ms()),
        }
    }

    /// Whether this window is still in effect at `now`.
    pub fn is_live(&self, now: u64) -> bool {
        self.reset_at > now
    }
}

/// Concurrent map from identifier to its current window.
///
/// Each identifier lives in one shard of the map, so operations on
/// different identifiers do not contend unless they share a shard.
#[derive(Debug, Default)]
pub struct WindowStore {
    entries: DashMap<String, WindowEntry>,
}

impl WindowStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a copy of the window for `id`, if one is stored.
    pub fn get(&self, id: &str) -> Option<WindowEntry> {
        self.entries.get(id).map(|entry| *entry)
    }

    /// Store `entry` as the window for `id`, replacing any previous one.
    pub fn set(&self, id: &str, entry: WindowEntry) {
        self.entries.insert(id.to_string(), entry);
    }

    /// Remove the window for `id`.
    pub fn remove(&self, id: &str) -> Option<WindowEntry> {
        self.entries.remove(id).map(|(_, entry)| entry)
    }

    /// Remove every window whose `reset_at` is before `now`.
    ///
    /// Returns the number of windows removed.
    pub fn sweep(&self, now: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.reset_at >= now);
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored windows.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no windows.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every stored window.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Run `f` on the slot for `id` while holding that identifier's lock.
    ///
    /// `f` sees `None` when nothing is stored. Whatever `f` leaves in the
    /// slot is written back before the lock is released, so look-up,
    /// comparison and mutation are atomic with respect to other callers
    /// for the same identifier.
    pub(crate) fn with_entry<R>(
        &self,
        id: &str,
        f: impl FnOnce(&mut Option<WindowEntry>) -> R,
    ) -> R {
        match self.entries.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let mut slot = Some(*occupied.get());
                let result = f(&mut slot);
                match slot {
                    Some(entry) => {
                        occupied.insert(entry);
                    }
                    None => {
                        occupied.remove();
                    }
                }
                result
            }
            Entry::Vacant(vacant) => {
                let mut slot = None;
                let result = f(&mut slot);
                if let Some(entry) = slot {
                    vacant.insert(entry);
                }
                result
            }
        }
    }
}
