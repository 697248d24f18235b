//! Per-connection handlers spawned by the coordinator.

pub mod results;
pub mod submission;

pub use results::ResultsWorker;
pub use submission::{SubmissionSummary, SubmissionWorker};
