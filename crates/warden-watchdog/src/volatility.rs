//! ATR from exchange candles.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use warden_core::Kline;

/// Candle interval and lookback for the ATR input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtrConfig {
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_period")]
    pub period: usize,
}

fn default_interval() -> String {
    "1h".to_string()
}

fn default_period() -> usize {
    14
}

impl Default for AtrConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            period: default_period(),
        }
    }
}

impl AtrConfig {
    /// Candles to request: one extra for the first true range.
    pub fn kline_limit(&self) -> u32 {
        u32::try_from(self.period.saturating_add(1)).unwrap_or(u32::MAX)
    }
}

/// Average true range over the last `period` candles, as a percentage of
/// the latest close.
///
/// Returns `None` with fewer than `period + 1` candles or a zero close.
pub fn atr_pct(klines: &[Kline], period: usize) -> Option<f64> {
    if period == 0 || klines.len() < period + 1 {
        return None;
    }
    let window = &klines[klines.len() - period - 1..];
    let mut sum = Decimal::ZERO;
    for pair in window.windows(2) {
        let prev_close = pair[0].close.inner();
        let high = pair[1].high.inner();
        let low = pair[1].low.inner();
        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        sum += tr;
    }
    let last_close = window.last()?.close.inner();
    if last_close.is_zero() {
        return None;
    }
    let atr = sum / Decimal::from(period);
    (atr / last_close * Decimal::ONE_HUNDRED).to_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use warden_core::Price;

    fn kline(t: u64, high: Decimal, low: Decimal, close: Decimal) -> Kline {
        Kline {
            open_time_ms: t,
            high: Price::new(high),
            low: Price::new(low),
            close: Price::new(close),
        }
    }

    #[test]
    fn test_atr_pct_constant_range() {
        let klines: Vec<_> = (0..5)
            .map(|i| kline(i, dec!(101), dec!(99), dec!(100)))
            .collect();
        assert_eq!(atr_pct(&klines, 4), Some(2.0));
    }

    #[test]
    fn test_atr_includes_gaps() {
        // Gap up from 100 to a 110-108 candle: TR = 110 - 100.
        let klines = vec![
            kline(0, dec!(101), dec!(99), dec!(100)),
            kline(1, dec!(110), dec!(108), dec!(100)),
        ];
        assert_eq!(atr_pct(&klines, 1), Some(10.0));
    }

    #[test]
    fn test_atr_needs_enough_candles() {
        let klines = vec![kline(0, dec!(101), dec!(99), dec!(100))];
        assert_eq!(atr_pct(&klines, 14), None);
        assert_eq!(atr_pct(&klines, 0), None);
    }

    #[test]
    fn test_kline_limit() {
        assert_eq!(AtrConfig::default().kline_limit(), 15);
    }
}
