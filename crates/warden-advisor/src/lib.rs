//! Boundary to the external advisory service.
//!
//! The advisor turns a position snapshot into a tagged proposal
//! (`skip | adjust | topUp | abort`) with a confidence and a rationale.
//! Everything that comes back is validated before the sequencer sees it.

pub mod adapter;
pub mod error;
pub mod http;
pub mod types;

pub use adapter::{DecisionAdapter, DynAdvisor, ScriptedAdvisor};
pub use error::{AdvisorError, AdvisorResult};
pub use http::{HttpAdvisorConfig, HttpDecisionAdapter};
pub use types::{Decision, DecisionRequest, Proposal, TargetLevel};
