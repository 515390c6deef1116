//! Job records, the status state machine, and the in-process job store.
//!
//! ## State machine
//!
//! ```text
//! pending ──▶ in_progress ──┬──▶ success
//!                           └──▶ failed
//! ```
//!
//! `success` and `failed` are terminal. A job is written exactly twice by the
//! executor (start, finish); every write replaces the whole record under the
//! store's write lock, so a reader never observes a status without its result.

use crate::error::{ErrorKind, JobStoreError};
use crate::task::TaskType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

/// Opaque, immutable job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }

    /// Position along the only path through the machine; used to check that
    /// observers never see a status go backwards.
    pub fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::InProgress => 1,
            JobStatus::Success | JobStatus::Failed => 2,
        }
    }

    fn allows(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::InProgress)
                | (JobStatus::InProgress, JobStatus::Success)
                | (JobStatus::InProgress, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A produced artifact plus the warnings collected while producing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionArtifact {
    pub output_ref: PathBuf,
    pub output_file_name: String,
    pub output_file_url: String,
    pub message: String,
    pub warnings: Vec<String>,
}

/// Why a job failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionFailure {
    pub error_kind: ErrorKind,
    pub error_message: String,
}

/// Terminal outcome of a job. `None` on the job while pending/in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobResult {
    Success(ConversionArtifact),
    Failed(ConversionFailure),
}

impl JobResult {
    fn status(&self) -> JobStatus {
        match self {
            JobResult::Success(_) => JobStatus::Success,
            JobResult::Failed(_) => JobStatus::Failed,
        }
    }
}

/// One submitted conversion tracked through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub task: TaskType,
    pub status: JobStatus,
    /// Original upload name as the client sent it.
    pub source_filename: String,
    /// Persisted upload, owned by this job until execution completes.
    pub input_ref: PathBuf,
    /// Produced artifact; set only on `success`.
    pub output_ref: Option<PathBuf>,
    pub result: Option<JobResult>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Process-scoped, internally synchronised job table.
///
/// Reads take a shared lock and clone the record out, so any number of
/// pollers can run while a worker performs its two writes.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new `pending` job.
    ///
    /// `input_ref` derives the upload location from the freshly allocated id,
    /// so the id is known before anything is written to disk.
    pub fn create(
        &self,
        task: TaskType,
        source_filename: impl Into<String>,
        input_ref: impl FnOnce(&JobId) -> PathBuf,
    ) -> Job {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let mut id = JobId::generate();
        while jobs.contains_key(&id) {
            id = JobId::generate();
        }
        let now = Utc::now();
        let job = Job {
            id,
            task,
            status: JobStatus::Pending,
            source_filename: source_filename.into(),
            input_ref: input_ref(&id),
            output_ref: None,
            result: None,
            created_at: now,
            updated_at: now,
        };
        jobs.insert(id, job.clone());
        job
    }

    /// Fetch a snapshot of a job.
    pub fn get(&self, id: &JobId) -> Result<Job, JobStoreError> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| JobStoreError::NotFound { id: id.to_string() })
    }

    /// Move a job along `pending → in_progress → {success, failed}`.
    ///
    /// `result` must be `None` when entering `in_progress` and must match the
    /// terminal status otherwise. Re-applying the transition that produced the
    /// current terminal status is a no-op and returns the stored record
    /// unchanged.
    pub fn transition(
        &self,
        id: &JobId,
        status: JobStatus,
        result: Option<JobResult>,
    ) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| JobStoreError::NotFound { id: id.to_string() })?;

        if job.status.is_terminal() && job.status == status {
            return Ok(job.clone());
        }

        let invalid = || JobStoreError::InvalidTransition {
            id: id.to_string(),
            from: job.status.to_string(),
            to: status.to_string(),
        };

        if !job.status.allows(status) {
            return Err(invalid());
        }
        let result_matches = match (&result, status) {
            (None, JobStatus::InProgress) => true,
            (Some(r), s) if s.is_terminal() => r.status() == s,
            _ => false,
        };
        if !result_matches {
            return Err(invalid());
        }

        let output_ref = match &result {
            Some(JobResult::Success(artifact)) => Some(artifact.output_ref.clone()),
            _ => None,
        };
        *job = Job {
            status,
            output_ref,
            result,
            updated_at: Utc::now(),
            ..job.clone()
        };
        Ok(job.clone())
    }

    /// Drop a job that never left `pending` (its upload could not be saved or
    /// it could not be queued). Jobs that have started are never removed here.
    pub fn abandon(&self, id: &JobId) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        match jobs.get(id) {
            None => Err(JobStoreError::NotFound { id: id.to_string() }),
            Some(job) if job.status != JobStatus::Pending => {
                Err(JobStoreError::InvalidTransition {
                    id: id.to_string(),
                    from: job.status.to_string(),
                    to: "abandoned".to_string(),
                })
            }
            Some(_) => {
                jobs.remove(id);
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── Status view (wire shape for the HTTP layer) ──────────────────────────

/// `{ id, status, result? }` as returned to polling clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResultView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum JobResultView {
    #[serde(rename_all = "camelCase")]
    Success {
        output_file_url: String,
        message: String,
        warnings: Vec<String>,
        source_filename: String,
    },
    #[serde(rename_all = "camelCase")]
    Failed {
        error_message: String,
        error_kind: ErrorKind,
        source_filename: String,
    },
}

impl From<&Job> for JobStatusView {
    fn from(job: &Job) -> Self {
        let result = job.result.as_ref().map(|r| match r {
            JobResult::Success(a) => JobResultView::Success {
                output_file_url: a.output_file_url.clone(),
                message: a.message.clone(),
                warnings: a.warnings.clone(),
                source_filename: job.source_filename.clone(),
            },
            JobResult::Failed(f) => JobResultView::Failed {
                error_message: f.error_message.clone(),
                error_kind: f.error_kind,
                source_filename: job.source_filename.clone(),
            },
        });
        Self {
            id: job.id.to_string(),
            status: job.status,
            result,
        }
    }
}
