//! Protective-order warden.
//!
//! Wires the shared machinery into a running process:
//! - one registry + dispatcher per enabled subsystem
//!   (strategy update, profit taker, top-up, entry update, health)
//! - the reconciler that keeps registries in step with the exchange
//! - the stale-order watchdog
//! - the optional metrics endpoint

pub mod app;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod subsystems;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
