//! Persistent per-entity registry.
//!
//! In-memory state is authoritative. Every mutation serializes the full
//! entry set and hands it to the snapshot store; a failed write is logged
//! and otherwise ignored.
//!
//! Completed keys are remembered in the same snapshot until the caller
//! reports the object they follow as gone, so a restart does not start
//! their work over.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};
use warden_core::Clock;
use warden_persistence::{Snapshot, SnapshotStore};
use warden_telemetry::Metrics;

use crate::entry::{EntryKey, EntryStatus, ScheduledEntry};

/// Default rehydration ceiling: entries older than six hours are dropped.
pub const DEFAULT_MAX_AGE_MS: u64 = 6 * 60 * 60 * 1000;

struct State<P> {
    entries: HashMap<EntryKey, ScheduledEntry<P>>,
    completed: BTreeSet<EntryKey>,
}

pub struct Registry<P> {
    name: String,
    state: Mutex<State<P>>,
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    max_age_ms: u64,
}

impl<P> Registry<P>
where
    P: Clone + Serialize + DeserializeOwned + Send + Sync,
{
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        max_age_ms: u64,
    ) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State {
                entries: HashMap::new(),
                completed: BTreeSet::new(),
            }),
            store,
            clock,
            max_age_ms,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Create a `waiting` entry due after `delay_ms`.
    ///
    /// Returns `false` and changes nothing when the key already exists.
    /// Scheduling a completed key clears its completion mark.
    pub fn schedule(&self, key: EntryKey, payload: P, delay_ms: u64) -> bool {
        let now = self.clock.now_ms();
        let mut state = self.state.lock();
        if state.entries.contains_key(&key) {
            return false;
        }
        debug!(registry = %self.name, key = %key, delay_ms, "Entry scheduled");
        state.completed.remove(&key);
        state
            .entries
            .insert(key.clone(), ScheduledEntry::new(key, payload, now, delay_ms));
        self.persist(&state);
        true
    }

    /// Put the entry back to `waiting`, due after `delay_ms`, and advance
    /// its cycle index.
    pub fn reschedule(&self, key: &EntryKey, delay_ms: u64) -> bool {
        let now = self.clock.now_ms();
        self.mutate(key, |entry| {
            entry.status = EntryStatus::Waiting;
            entry.trigger_at_ms = now.saturating_add(delay_ms);
            entry.cycle_index += 1;
            entry.checks += 1;
            entry.last_check_ms = Some(now);
        })
    }

    /// Move a `waiting` entry to `processing`.
    pub fn mark_processing(&self, key: &EntryKey) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(key) else {
            return false;
        };
        if entry.status != EntryStatus::Waiting {
            return false;
        }
        entry.status = EntryStatus::Processing;
        self.persist(&state);
        true
    }

    /// Record an error. Status is unchanged.
    pub fn mark_error(&self, key: &EntryKey, error: &str) -> bool {
        let now = self.clock.now_ms();
        self.mutate(key, |entry| {
            entry.last_error = Some(error.to_string());
            entry.last_error_at_ms = Some(now);
        })
    }

    /// Remove the entry and remember the key as completed.
    pub fn mark_completed(&self, key: &EntryKey) -> bool {
        let mut state = self.state.lock();
        if state.entries.remove(key).is_none() {
            return false;
        }
        debug!(registry = %self.name, key = %key, "Entry completed");
        state.completed.insert(key.clone());
        self.persist(&state);
        true
    }

    /// Whether `key` was completed and not yet forgotten.
    pub fn is_completed(&self, key: &EntryKey) -> bool {
        self.state.lock().completed.contains(key)
    }

    pub fn completed_keys(&self) -> Vec<EntryKey> {
        self.state.lock().completed.iter().cloned().collect()
    }

    /// Drop completion marks for keys not in `live`. Returns how many
    /// were dropped.
    pub fn forget_completed(&self, live: &HashSet<EntryKey>) -> usize {
        let mut state = self.state.lock();
        let before = state.completed.len();
        state.completed.retain(|k| live.contains(k));
        let dropped = before - state.completed.len();
        if dropped > 0 {
            debug!(registry = %self.name, dropped, "Completion marks dropped");
            self.persist(&state);
        }
        dropped
    }

    /// `waiting` entries with `trigger_at_ms <= now`, earliest first.
    pub fn get_due(&self, now_ms: u64) -> Vec<ScheduledEntry<P>> {
        let state = self.state.lock();
        let mut due: Vec<_> = state
            .entries
            .values()
            .filter(|e| e.is_due(now_ms))
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.trigger_at_ms
                .cmp(&b.trigger_at_ms)
                .then_with(|| a.key.cmp(&b.key))
        });
        due
    }

    /// Select up to `limit` due entries and mark them `processing` under
    /// one lock. A claimed key is not returned again until rescheduled.
    pub fn claim_due(&self, now_ms: u64, limit: usize) -> Vec<ScheduledEntry<P>> {
        let mut state = self.state.lock();
        let mut due: Vec<(u64, EntryKey)> = state
            .entries
            .values()
            .filter(|e| e.is_due(now_ms))
            .map(|e| (e.trigger_at_ms, e.key.clone()))
            .collect();
        if due.is_empty() {
            return Vec::new();
        }
        due.sort();
        due.truncate(limit);

        let mut claimed = Vec::with_capacity(due.len());
        for (_, key) in due {
            if let Some(entry) = state.entries.get_mut(&key) {
                entry.status = EntryStatus::Processing;
                claimed.push(entry.clone());
            }
        }
        self.persist(&state);
        claimed
    }

    /// Apply `f` to the entry's payload.
    pub fn update_payload(&self, key: &EntryKey, f: impl FnOnce(&mut P)) -> bool {
        self.mutate(key, |entry| f(&mut entry.payload))
    }

    pub fn get(&self, key: &EntryKey) -> Option<ScheduledEntry<P>> {
        self.state.lock().entries.get(key).cloned()
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    pub fn get_all(&self) -> Vec<ScheduledEntry<P>> {
        let mut all: Vec<_> = self.state.lock().entries.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        all
    }

    pub fn keys(&self) -> Vec<EntryKey> {
        let mut keys: Vec<_> = self.state.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Load the snapshot written by a previous run.
    ///
    /// Entries older than the age ceiling are dropped, entries caught
    /// mid-`processing` go back to `waiting`, and keys already in memory
    /// are left alone. Completion marks are restored for keys not in
    /// memory. Returns the number of entries restored.
    pub fn rehydrate(&self) -> usize {
        let raw = match self.store.load() {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                info!(registry = %self.name, "No snapshot to rehydrate");
                return 0;
            }
            Err(e) => {
                warn!(registry = %self.name, error = %e, "Failed to read registry snapshot");
                return 0;
            }
        };
        let snapshot: Snapshot<ScheduledEntry<P>, EntryKey> = match Snapshot::decode(&raw) {
            Ok(s) => s,
            Err(e) => {
                warn!(
                    registry = %self.name,
                    store = %self.store.describe(),
                    error = %e,
                    "Discarding unreadable registry snapshot"
                );
                return 0;
            }
        };

        let now = self.clock.now_ms();
        let mut restored = 0;
        let mut expired = 0;
        let mut state = self.state.lock();
        for mut entry in snapshot.entries {
            if now.saturating_sub(entry.since_ms) > self.max_age_ms {
                expired += 1;
                continue;
            }
            match entry.status {
                EntryStatus::Completed => continue,
                EntryStatus::Processing => entry.status = EntryStatus::Waiting,
                EntryStatus::Waiting => {}
            }
            if state.entries.contains_key(&entry.key) {
                continue;
            }
            state.entries.insert(entry.key.clone(), entry);
            restored += 1;
        }
        for key in snapshot.completed {
            if !state.entries.contains_key(&key) {
                state.completed.insert(key);
            }
        }
        info!(
            registry = %self.name,
            restored,
            expired,
            completed = state.completed.len(),
            snapshot_ts = snapshot.timestamp,
            "Registry rehydrated"
        );
        self.persist(&state);
        restored
    }

    fn mutate(&self, key: &EntryKey, f: impl FnOnce(&mut ScheduledEntry<P>)) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(key) else {
            return false;
        };
        f(entry);
        self.persist(&state);
        true
    }

    /// Write the full entry set. Called with the lock held so snapshots
    /// land in mutation order.
    fn persist(&self, state: &State<P>) {
        Metrics::registry_size(&self.name, state.entries.len());

        let mut list: Vec<_> = state.entries.values().cloned().collect();
        list.sort_by(|a, b| a.key.cmp(&b.key));
        let snapshot = Snapshot {
            timestamp: self.clock.now_ms(),
            entries: list,
            completed: state.completed.iter().cloned().collect(),
        };
        let result = snapshot.encode().and_then(|raw| self.store.save(&raw));
        if let Err(e) = result {
            warn!(
                registry = %self.name,
                store = %self.store.describe(),
                error = %e,
                "Failed to persist registry snapshot"
            );
        }
    }
}
