//! Exchange boundary for the warden.
//!
//! - `ExchangeApi`: dyn-compatible async trait every component talks to
//! - `RestExchangeClient`: signed REST client for USDⓈ-M style futures APIs
//! - `MockExchange`: in-memory exchange with call recording and failure injection
//! - `BackoffCoordinator`: shared rate-limit budget and suspension state

pub mod api;
pub mod backoff;
pub mod error;
pub mod mock;
pub mod rest;

pub use api::{BoxFuture, DynExchange, ExchangeApi};
pub use backoff::{BackoffConfig, BackoffCoordinator, SuspendCause};
pub use error::{ExchangeError, ExchangeResult};
pub use mock::{ExchangeCall, MockExchange, MockOp};
pub use rest::{Credentials, RestConfig, RestExchangeClient};
