//! Randomized delay windows.
//!
//! Every reschedule adds a random offset so entries sharing a base
//! interval do not hit the exchange in the same instant.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Inclusive jitter window in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JitterWindow {
    min_ms: u64,
    max_ms: u64,
}

impl JitterWindow {
    /// Create a window; `min_ms` must not exceed `max_ms`.
    pub fn new(min_ms: u64, max_ms: u64) -> Result<Self> {
        if min_ms > max_ms {
            return Err(CoreError::InvalidJitter(format!(
                "jitter window min ({min_ms}ms) exceeds max ({max_ms}ms)"
            )));
        }
        Ok(Self { min_ms, max_ms })
    }

    /// A window that always yields zero.
    pub const fn none() -> Self {
        Self { min_ms: 0, max_ms: 0 }
    }

    pub fn min_ms(&self) -> u64 {
        self.min_ms
    }

    pub fn max_ms(&self) -> u64 {
        self.max_ms
    }

    /// Sample an offset using the thread-local RNG.
    pub fn sample(&self) -> u64 {
        self.sample_with(&mut rand::thread_rng())
    }

    /// Sample an offset using the given RNG.
    pub fn sample_with<R: Rng>(&self, rng: &mut R) -> u64 {
        if self.min_ms == self.max_ms {
            return self.min_ms;
        }
        rng.gen_range(self.min_ms..=self.max_ms)
    }

    /// `base_ms` plus a sampled offset.
    pub fn apply(&self, base_ms: u64) -> u64 {
        base_ms.saturating_add(self.sample())
    }
}

impl Default for JitterWindow {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_rejects_inverted_window() {
        assert!(JitterWindow::new(500, 100).is_err());
    }

    #[test]
    fn test_samples_within_bounds() {
        let window = JitterWindow::new(1_000, 5_000).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let s = window.sample_with(&mut rng);
            assert!((1_000..=5_000).contains(&s));
        }
    }

    #[test]
    fn test_degenerate_window() {
        let window = JitterWindow::new(250, 250).unwrap();
        assert_eq!(window.sample(), 250);
        assert_eq!(JitterWindow::none().apply(10_000), 10_000);
    }
}
