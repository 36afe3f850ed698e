//! Core domain types for the protective-order warden.
//!
//! This crate provides fundamental types used throughout the system:
//! - `Price`, `Size`: Precision-safe numeric types
//! - `OrderSide`, `PositionSide`, `OrderKind`: Trading enums
//! - `OrderTag`: The single prefix table deciding which orders are ours
//! - `ClientOrderId`: Deterministic, hash-derived client order IDs
//! - `Clock`, `JitterWindow`: Time source and randomized delays
//! - `SessionCutoff`: Daily wall-clock cutoff used by the watchdog

pub mod clock;
pub mod decimal;
pub mod error;
pub mod jitter;
pub mod order;
pub mod session;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use jitter::JitterWindow;
pub use order::{ClientOrderId, OrderKind, OrderOwner, OrderSide, OrderTag, PositionSide};
pub use session::SessionCutoff;
pub use types::{Kline, OpenOrder, OrderRequest, PlacedOrder, Position, SymbolInfo};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;
