/// Ordering applied when claiming the next eligible job.
///
/// Both strategies claim a single row with `FOR UPDATE SKIP LOCKED` and
/// never return a job scheduled in the future; they only differ in which
/// eligible row wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PollStrategy {
    /// Highest-priority job first (a lower number means a higher
    /// priority), ties broken by earliest `run_at`, then insertion order.
    #[default]
    Priority,

    /// Oldest-due job first, priority as the tie breaker.
    RunAt,
}

impl PollStrategy {
    pub(crate) fn order_by(self) -> &'static str {
        match self {
            Self::Priority => "priority ASC, run_at ASC, job_id ASC",
            Self::RunAt => "run_at ASC, priority ASC, job_id ASC",
        }
    }
}
