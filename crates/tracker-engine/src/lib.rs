#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! In-process reconciliation engine for `support-tracker`: upstream clients,
//! the normalizer, the per-source reconcilers, credential validation, and the
//! job scheduler.

/// Public API types for the engine.
pub mod api;
/// The job registry and runner.
pub mod jobs;
/// One-shot credential checks.
pub mod validate;

mod error;
mod normalize;
mod reconcile;
mod testdata;
mod upstream;

#[cfg(test)]
mod scenarios;

pub use api::{
    EngineConfig, JobProgress, JobStatus, JobSummary, JobView, QueryParams, ServiceErrorEntry,
    ServiceOutcome, StartRequest,
};
pub use error::{Service, SourceFailure, UpstreamError};
pub use jobs::{CancelResult, Scheduler};
