//! Precision-safe decimal types for trading.
//!
//! Uses `rust_decimal` for exact decimal arithmetic. Exchange precision
//! (tick size, step size) is applied here so every comparison the
//! sequencer makes is between values the exchange would actually accept.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::str::FromStr;

/// Shared surface of the decimal newtypes: constructors, predicates,
/// canonical rendering, parsing and same-type arithmetic.
macro_rules! decimal_newtype {
    ($name:ident) => {
        impl $name {
            pub const ZERO: Self = Self(Decimal::ZERO);

            #[inline]
            pub fn new(value: Decimal) -> Self {
                Self(value)
            }

            #[inline]
            pub fn inner(&self) -> Decimal {
                self.0
            }

            #[inline]
            pub fn is_zero(&self) -> bool {
                self.0.is_zero()
            }

            #[inline]
            pub fn is_positive(&self) -> bool {
                self.0 > Decimal::ZERO
            }

            /// Trailing zeros stripped, so `100.50` and `100.5` hash alike
            /// when deriving client order ids.
            pub fn canonical(&self) -> String {
                self.0.normalize().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = rust_decimal::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse().map(Self)
            }
        }

        impl From<Decimal> for $name {
            fn from(d: Decimal) -> Self {
                Self(d)
            }
        }

        impl Add for $name {
            type Output = Self;

            fn add(self, rhs: Self) -> Self {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $name {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self {
                Self(self.0 - rhs.0)
            }
        }

        impl Mul<Decimal> for $name {
            type Output = Self;

            fn mul(self, factor: Decimal) -> Self {
                Self(self.0 * factor)
            }
        }
    };
}

/// Order or trigger price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

decimal_newtype!(Price);

impl Price {
    /// Nearest multiple of `tick`; a zero tick leaves the price as is.
    pub fn round_to_tick(&self, tick: Price) -> Self {
        if tick.is_zero() {
            return *self;
        }
        Self(((self.0 / tick.0).round() * tick.0).normalize())
    }

    /// `|self - reference| / reference` in percent; `None` for a zero reference.
    pub fn abs_pct_from(&self, reference: Price) -> Option<Decimal> {
        if reference.is_zero() {
            return None;
        }
        Some((self.0 - reference.0).abs() / reference.0 * Decimal::ONE_HUNDRED)
    }
}

/// Order or position quantity in base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Size(pub Decimal);

decimal_newtype!(Size);

impl Size {
    /// Floor to a multiple of `step`; the exchange rejects fractional steps.
    pub fn round_to_step(&self, step: Size) -> Self {
        if step.is_zero() {
            return *self;
        }
        Self(((self.0 / step.0).floor() * step.0).normalize())
    }
}
