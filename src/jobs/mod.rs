//! # Job Orchestration Module
//!
//! The asynchronous heart of the service: tracks transcription jobs from
//! submission to a terminal state and runs them off the request path.
//!
//! ## Key Components:
//! - **Job Store**: concurrency-safe id → record map, the only mutation
//!   surface for job state
//! - **Job Executor**: owns the background task per job, bounds concurrency,
//!   and guarantees exactly one terminal update and temp-file cleanup
//!
//! ## Job Lifecycle:
//! `create` (record visible immediately, status `processing`) → background
//! execution → exactly one transition to `completed` or `failed`. Records are
//! kept for the lifetime of the process.

pub mod executor;
pub mod store;

pub use executor::{JobExecutor, Submission};
pub use store::{JobOutcome, JobRecord, JobStatus, JobStore};
