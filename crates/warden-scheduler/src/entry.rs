//! Scheduled entry types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Registry key: `SYMBOL` for position-scoped entries,
/// `SYMBOL:ORDER_ID` for order-scoped ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryKey(String);

impl EntryKey {
    pub fn position(symbol: &str) -> Self {
        Self(symbol.to_string())
    }

    pub fn order(symbol: &str, order_id: &str) -> Self {
        Self(format!("{symbol}:{order_id}"))
    }

    pub fn symbol(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(s, _)| s)
    }

    pub fn order_id(&self) -> Option<&str> {
        self.0.split_once(':').map(|(_, id)| id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Waiting,
    Processing,
    /// Terminal. Completed entries are removed from the registry.
    Completed,
}

/// One scheduled task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledEntry<P> {
    pub key: EntryKey,
    pub status: EntryStatus,
    /// Eligible for dispatch once `now >= trigger_at_ms`.
    pub trigger_at_ms: u64,
    /// Incremented on every reschedule.
    pub cycle_index: u64,
    pub checks: u64,
    pub last_check_ms: Option<u64>,
    pub last_error: Option<String>,
    pub last_error_at_ms: Option<u64>,
    /// Creation time; rehydration drops entries older than the ceiling.
    pub since_ms: u64,
    pub payload: P,
}

impl<P> ScheduledEntry<P> {
    pub fn new(key: EntryKey, payload: P, now_ms: u64, delay_ms: u64) -> Self {
        Self {
            key,
            status: EntryStatus::Waiting,
            trigger_at_ms: now_ms.saturating_add(delay_ms),
            cycle_index: 0,
            checks: 0,
            last_check_ms: None,
            last_error: None,
            last_error_at_ms: None,
            since_ms: now_ms,
            payload,
        }
    }

    pub fn is_due(&self, now_ms: u64) -> bool {
        self.status == EntryStatus::Waiting && self.trigger_at_ms <= now_ms
    }
}
