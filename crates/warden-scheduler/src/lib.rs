//! Scheduling core shared by every subsystem.
//!
//! A [`Registry`] holds one [`ScheduledEntry`] per key (symbol, or
//! symbol plus order id) and snapshots itself on every mutation. A
//! [`Dispatcher`] polls its registry, claims due entries up to a
//! concurrency cap, runs the subsystem's [`EntryHandler`] on each and
//! writes the outcome back as a jittered reschedule or a completion.

pub mod dispatcher;
pub mod entry;
pub mod error;
pub mod registry;

pub use dispatcher::{DispatchReport, Dispatcher, DispatcherConfig, EntryHandler, Outcome};
pub use entry::{EntryKey, EntryStatus, ScheduledEntry};
pub use error::{TaskError, TaskResult};
pub use registry::Registry;
