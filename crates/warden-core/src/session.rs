//! Daily session cutoff.
//!
//! The watchdog cancels stale entry orders once the wall clock passes a
//! configured UTC time of day. The cutoff is parsed at startup and an
//! invalid value is a hard error.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// UTC time of day after which the session is considered closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionCutoff(NaiveTime);

impl SessionCutoff {
    /// Parse `HH:MM` (24h, UTC).
    pub fn parse(s: &str) -> Result<Self, CoreError> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Self)
            .map_err(|_| CoreError::InvalidSessionCutoff(s.to_string()))
    }

    pub fn time(&self) -> NaiveTime {
        self.0
    }

    /// Whether `dt` is at or past the cutoff on its own UTC day.
    #[must_use]
    pub fn has_passed(&self, dt: DateTime<Utc>) -> bool {
        dt.time() >= self.0
    }
}

impl FromStr for SessionCutoff {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SessionCutoff {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SessionCutoff> for String {
    fn from(value: SessionCutoff) -> Self {
        value.to_string()
    }
}

impl fmt::Display for SessionCutoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}
