use thiserror::Error;

/// Errors returned when enqueueing a job.
///
/// Validation failures are reported before any row is written.
#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The job has an empty `job_type` and cannot be routed to a handler.
    #[error("job type must not be empty")]
    MissingType,

    /// The job args are not a valid JSON document.
    #[error("job args must be valid JSON")]
    InvalidArgs(#[source] serde_json::Error),

    /// The database rejected the insert.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Errors returned when finalizing a locked [`Job`](crate::Job).
#[derive(Debug, Error)]
pub enum JobError {
    /// The transaction holding the job's lock has already been committed
    /// with [`Job::done`](crate::Job::done).
    #[error("job transaction has already been closed")]
    TransactionClosed,

    /// A finalization statement failed.
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    /// The final commit failed. When the reschedule update itself had
    /// already failed, its message is carried along so neither error is
    /// lost.
    #[error("failed to commit job transaction{}", .original.as_ref().map(|e| format!(" (original error: {e})")).unwrap_or_default())]
    CommitFailed {
        /// The error that preceded the commit attempt, if any.
        original: Option<String>,
        /// The commit failure itself.
        #[source]
        source: sqlx::Error,
    },
}

/// Error returned when a worker is constructed with an unusable work map.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkMapError {
    /// A work map entry is keyed by the empty string, which no job can
    /// ever be routed to.
    #[error("work map contains an entry with an empty job type")]
    EmptyJobType,
}
