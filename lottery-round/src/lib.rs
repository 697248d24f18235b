//! Round coordination for the agency lottery server.
//!
//! A round collects bet batches from every agency, runs the draw once all of
//! them have signalled end-of-stream, then answers each agency's winners
//! query before the next round begins.

pub mod barrier;
pub mod coordinator;
pub mod error;
pub mod round;
pub mod worker;

pub use barrier::{AgencyBarrier, Arrivals, BarrierHandle, Phase};
pub use coordinator::RoundCoordinator;
pub use error::{Result, RoundError};
pub use round::{Round, RoundOutcome, RoundPhase};
pub use worker::{ResultsWorker, SubmissionSummary, SubmissionWorker};
