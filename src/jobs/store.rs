//! # Job Store
//!
//! In-memory store of transcription job records. This is the single shared
//! mutable structure of the service, so its contract is deliberately small:
//! `create`, `get`, `update` - nothing else can touch a record.
//!
//! ## Thread Safety:
//! Backed by a sharded concurrent map (`DashMap`), so a status read for one
//! job never blocks behind an update to an unrelated job. An update holds the
//! record's shard lock for the duration of the mutation, which makes the
//! transition atomic: readers observe the record either fully before or fully
//! after it.
//!
//! ## State Machine:
//! `Processing → Completed` or `Processing → Failed`, exactly once. The store
//! rejects updates to terminal or unknown records instead of overwriting.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

/// Status of a transcription job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Job accepted; background work queued or running
    Processing,
    /// Transcription finished; the record carries the text
    Completed,
    /// Job hit an error; the record carries the message
    Failed,
}

impl JobStatus {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// One tracked transcription job.
///
/// `result` is present exactly when the status is `Completed`, `error`
/// exactly when it is `Failed`.
#[derive(Debug, Clone)]
pub struct JobRecord {
    pub id: String,
    pub status: JobStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Terminal outcome written by the executor.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Completed(String),
    Failed(String),
}

/// Why an update was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    UnknownJob(String),
    AlreadyTerminal(String),
}

impl fmt::Display for UpdateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateError::UnknownJob(id) => write!(f, "no job with id {}", id),
            UpdateError::AlreadyTerminal(id) => {
                write!(f, "job {} already reached a terminal state", id)
            }
        }
    }
}

/// Snapshot of record counts per status, reported by /health.
#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct JobCounts {
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Concurrency-safe job record store.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: DashMap<String, JobRecord>,
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
        }
    }

    /// Allocate a fresh id and insert a `Processing` record for it.
    ///
    /// The record is visible to `get` before this method returns, so a
    /// client can never poll an id it was handed and see "not found".
    /// UUID v4 gives 122 random bits; collisions within one process
    /// lifetime are not a practical concern.
    pub fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let record = JobRecord {
            id: id.clone(),
            status: JobStatus::Processing,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.jobs.insert(id.clone(), record);
        id
    }

    /// Fetch a copy of a record.
    ///
    /// Cloning under the shard lock keeps the read atomic and releases the
    /// lock before the caller serializes the record into a response.
    pub fn get(&self, id: &str) -> Option<JobRecord> {
        self.jobs.get(id).map(|record| record.clone())
    }

    /// Transition a record to its terminal state.
    ///
    /// Rejects unknown ids and records that are already terminal; a second
    /// completion attempt is a caller bug and must not clobber the first
    /// outcome.
    pub fn update(&self, id: &str, outcome: JobOutcome) -> Result<(), UpdateError> {
        let mut record = self
            .jobs
            .get_mut(id)
            .ok_or_else(|| UpdateError::UnknownJob(id.to_string()))?;

        if record.status.is_terminal() {
            return Err(UpdateError::AlreadyTerminal(id.to_string()));
        }

        match outcome {
            JobOutcome::Completed(text) => {
                record.status = JobStatus::Completed;
                record.result = Some(text);
            }
            JobOutcome::Failed(message) => {
                record.status = JobStatus::Failed;
                record.error = Some(message);
            }
        }
        record.updated_at = Utc::now();

        Ok(())
    }

    /// Count records by status (for /health reporting).
    pub fn counts(&self) -> JobCounts {
        let mut counts = JobCounts::default();
        for record in self.jobs.iter() {
            match record.status {
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
