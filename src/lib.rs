#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod backoff;
mod client;
mod errors;
mod job;
mod poll_strategy;
mod pool;
mod worker;

/// Backoff schedules for rescheduling failed jobs.
pub use self::backoff::Backoff;
/// Queue client for enqueueing and claiming jobs.
pub use self::client::{Client, FinishedJob};
/// Error types for enqueueing, finalization, and worker construction.
pub use self::errors::{EnqueueError, JobError, WorkMapError};
/// Job types: enqueue parameters and locked jobs.
pub use self::job::{Job, NewJob};
/// Ordering strategies for claiming the next job.
pub use self::poll_strategy::PollStrategy;
/// Worker pool supervision.
pub use self::pool::WorkerPool;
/// Workers and work-function registration.
pub use self::worker::{WorkFn, WorkMap, Worker, work_fn};

/// Applies the queue schema to the given database.
///
/// Runs the crate's embedded migrations, creating the `toil_jobs` and
/// `toil_jobs_finished` tables and their indexes. Safe to call on every
/// startup.
pub async fn setup_database(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
