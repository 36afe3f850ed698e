//! Order lifecycle sequencing.
//!
//! Turns a proposal into exchange calls without ever leaving a position
//! unprotected:
//!
//! 1. a proposed stop worse than the most protective live stop is refused
//! 2. a stop at or through the mark becomes a market exit
//! 3. the new stop is created first; if that fails nothing else happens
//! 4. targets are created only once a stop exists
//! 5. superseded orders of the calling subsystem are cancelled last

pub mod error;
pub mod protective;
pub mod sequencer;

pub use error::{SequencerError, SequencerResult};
pub use protective::ProtectiveOrderSet;
pub use sequencer::{OrderSequencer, ProtectionPlan, RepositionReport, SequenceReport, StopLeg};
