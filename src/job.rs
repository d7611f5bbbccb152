use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, Postgres, Transaction};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};

use crate::backoff::Backoff;
use crate::errors::JobError;

/// A job to be inserted into the queue.
///
/// Only `job_type` is required; everything else has queue-wide defaults.
#[derive(Debug, Clone)]
pub struct NewJob {
    /// Queue the job is routed to. Defaults to the empty queue `""`.
    pub queue: String,
    /// Priority of the job; a lower number means a higher priority.
    pub priority: i16,
    /// When the job becomes eligible. `None` means immediately, applied
    /// as the database's `now()` at insert time.
    pub run_at: Option<DateTime<Utc>>,
    /// Routing key that maps the job to a work function.
    pub job_type: String,
    /// Arguments as the bytes of a valid JSON document.
    pub args: Vec<u8>,
}

impl NewJob {
    /// Creates a job of the given type with default queue, priority,
    /// schedule, and empty (`[]`) args.
    pub fn new(job_type: impl Into<String>) -> Self {
        Self {
            queue: String::new(),
            priority: 0,
            run_at: None,
            job_type: job_type.into(),
            args: b"[]".to_vec(),
        }
    }

    /// Routes the job to the given queue.
    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Sets the job priority. Lower numbers run first.
    pub fn priority(mut self, priority: i16) -> Self {
        self.priority = priority;
        self
    }

    /// Delays the job until the given time.
    pub fn run_at(mut self, run_at: DateTime<Utc>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    /// Sets the job arguments. Must be the bytes of a valid JSON
    /// document; enqueueing validates this.
    pub fn args(mut self, args: impl Into<Vec<u8>>) -> Self {
        self.args = args.into();
        self
    }
}

/// Row projection scanned by the locking query.
#[derive(Debug, FromRow)]
pub(crate) struct JobRow {
    pub(crate) job_id: i64,
    pub(crate) queue: String,
    pub(crate) priority: i16,
    pub(crate) run_at: DateTime<Utc>,
    pub(crate) job_type: String,
    pub(crate) args: Value,
    pub(crate) error_count: i32,
    pub(crate) last_error: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

struct JobState {
    tx: Option<Transaction<'static, Postgres>>,
    finished: bool,
    deleted: bool,
    finished_at: Option<DateTime<Utc>>,
}

/// A locked job claimed from the queue.
///
/// The job carries the open transaction that holds its row lock. Every
/// locked job must end in exactly one of: [`delete`](Job::delete) or
/// [`finish`](Job::finish) followed by [`done`](Job::done), or
/// [`error`](Job::error) (which commits by itself). Dropping the job
/// without committing rolls the transaction back and releases the lock,
/// leaving the row to be claimed again.
///
/// Workers perform the finalization themselves; work functions only need
/// these methods when they manage a job's outcome manually.
pub struct Job {
    /// Unique database id of the job.
    pub id: i64,
    /// Queue the job was claimed from.
    pub queue: String,
    /// Priority of the job; a lower number means a higher priority.
    pub priority: i16,
    /// The time this run became eligible.
    pub run_at: DateTime<Utc>,
    /// Routing key that mapped the job to its work function.
    pub job_type: String,
    /// Job arguments as stored.
    pub args: Value,
    /// Number of previous attempts that failed with an error.
    pub error_count: i32,
    /// Error message of the most recent failed attempt.
    pub last_error: Option<String>,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the job row was last updated.
    pub updated_at: DateTime<Utc>,
    backoff: Backoff,
    state: Mutex<JobState>,
}

impl Job {
    pub(crate) fn locked(
        row: JobRow,
        tx: Transaction<'static, Postgres>,
        backoff: Backoff,
    ) -> Self {
        Self {
            id: row.job_id,
            queue: row.queue,
            priority: row.priority,
            run_at: row.run_at,
            job_type: row.job_type,
            args: row.args,
            error_count: row.error_count,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            backoff,
            state: Mutex::new(JobState {
                tx: Some(tx),
                finished: false,
                deleted: false,
                finished_at: None,
            }),
        }
    }

    /// Guarded access to the transaction this job is locked to, for
    /// running additional SQL atomically with the job's outcome. The
    /// slot is `None` once [`done`](Job::done) has committed. Finalization
    /// blocks while the guard is held.
    pub async fn tx(&self) -> MappedMutexGuard<'_, Option<Transaction<'static, Postgres>>> {
        MutexGuard::map(self.state.lock().await, |state| &mut state.tx)
    }

    /// When the job was marked finished in this run, if it was.
    pub async fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.finished_at
    }

    /// Marks this job as complete by deleting its row. Idempotent.
    ///
    /// The transaction stays open; call [`done`](Job::done) to commit.
    pub async fn delete(&self) -> Result<(), JobError> {
        let mut state = self.state.lock().await;
        if state.deleted {
            return Ok(());
        }

        let tx = state.tx.as_mut().ok_or(JobError::TransactionClosed)?;
        sqlx::query("DELETE FROM toil_jobs WHERE job_id = $1")
            .bind(self.id)
            .execute(&mut **tx)
            .await?;

        state.deleted = true;
        Ok(())
    }

    /// Marks this job as complete by setting `finished_at` on its row,
    /// keeping the row in the queue table. Idempotent.
    ///
    /// The transaction stays open; call [`done`](Job::done) to commit.
    pub async fn finish(&self) -> Result<(), JobError> {
        let mut state = self.state.lock().await;
        if state.finished {
            return Ok(());
        }

        let tx = state.tx.as_mut().ok_or(JobError::TransactionClosed)?;
        let finished_at: DateTime<Utc> = sqlx::query_scalar(
            "UPDATE toil_jobs SET finished_at = now() WHERE job_id = $1 RETURNING finished_at",
        )
        .bind(self.id)
        .fetch_one(&mut **tx)
        .await?;

        state.finished = true;
        state.finished_at = Some(finished_at);
        Ok(())
    }

    /// Copies this job, with all of its columns, into the finished-jobs
    /// archive table. No-op unless [`finish`](Job::finish) ran first.
    ///
    /// The transaction stays open; call [`done`](Job::done) to commit.
    pub async fn migrate(&self) -> Result<(), JobError> {
        let mut state = self.state.lock().await;
        if !state.finished {
            return Ok(());
        }

        let tx = state.tx.as_mut().ok_or(JobError::TransactionClosed)?;
        sqlx::query(
            r"
            INSERT INTO toil_jobs_finished (job_id, queue, priority, run_at, job_type, args,
                                            error_count, last_error, created_at, updated_at,
                                            finished_at)
            SELECT job_id, queue, priority, run_at, job_type, args,
                   error_count, last_error, created_at, updated_at, finished_at
            FROM toil_jobs
            WHERE job_id = $1
            ",
        )
        .bind(self.id)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Commits the transaction, releasing the row lock and returning the
    /// connection to the pool. Idempotent once the transaction is gone.
    pub async fn done(&self) -> Result<(), JobError> {
        let mut state = self.state.lock().await;
        Self::commit(&mut state).await?;
        Ok(())
    }

    /// Marks this attempt as failed: increments the error count, stores
    /// `msg` as the last error, and reschedules the job per the backoff
    /// captured at lock time. With [`Backoff::Never`] the row is deleted
    /// instead of rescheduled.
    ///
    /// Unlike [`delete`](Job::delete) and [`finish`](Job::finish), this
    /// commits the transaction itself; calling [`done`](Job::done)
    /// afterwards is harmless. The commit is attempted even when the
    /// reschedule update fails, and a commit failure is chained onto the
    /// original error.
    pub async fn error(&self, msg: &str) -> Result<(), JobError> {
        let mut state = self.state.lock().await;

        let update = self.reschedule(&mut state, msg).await;
        let commit = Self::commit(&mut state).await;

        match (update, commit) {
            (Ok(()), Ok(())) => Ok(()),
            (update, Err(source)) => Err(JobError::CommitFailed {
                original: update.err().map(|e| e.to_string()),
                source,
            }),
            (Err(update), Ok(())) => Err(update),
        }
    }

    async fn reschedule(&self, state: &mut JobState, msg: &str) -> Result<(), JobError> {
        let tx = state.tx.as_mut().ok_or(JobError::TransactionClosed)?;
        let error_count = self.error_count + 1;

        match self.backoff.delay(error_count) {
            Some(delay) => {
                sqlx::query(
                    r"
                    UPDATE toil_jobs
                    SET error_count = $2,
                        run_at      = now() + $3 * interval '1 millisecond',
                        last_error  = $4,
                        updated_at  = now()
                    WHERE job_id = $1
                    ",
                )
                .bind(self.id)
                .bind(error_count)
                .bind(delay.as_millis() as f64)
                .bind(msg)
                .execute(&mut **tx)
                .await?;
            }
            None => {
                // terminal failure: discard instead of rescheduling
                sqlx::query("DELETE FROM toil_jobs WHERE job_id = $1")
                    .bind(self.id)
                    .execute(&mut **tx)
                    .await?;
                state.deleted = true;
            }
        }

        Ok(())
    }

    async fn commit(state: &mut JobState) -> Result<(), sqlx::Error> {
        match state.tx.take() {
            Some(tx) => tx.commit().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("queue", &self.queue)
            .field("priority", &self.priority)
            .field("run_at", &self.run_at)
            .field("job_type", &self.job_type)
            .field("error_count", &self.error_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_applies_defaults() {
        let job = NewJob::new("welcome_email");

        assert_eq!(job.job_type, "welcome_email");
        assert_eq!(job.queue, "");
        assert_eq!(job.priority, 0);
        assert_eq!(job.run_at, None);
        assert_eq!(job.args, b"[]");
    }

    #[test]
    fn new_job_builder_overrides_defaults() {
        let run_at = Utc::now();
        let job = NewJob::new("welcome_email")
            .queue("mail")
            .priority(-5)
            .run_at(run_at)
            .args(br#"{"user_id": 7}"#.to_vec());

        assert_eq!(job.queue, "mail");
        assert_eq!(job.priority, -5);
        assert_eq!(job.run_at, Some(run_at));
        assert_eq!(job.args, br#"{"user_id": 7}"#);
    }
}
