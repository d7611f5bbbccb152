use std::sync::Arc;
use std::time::Duration;

/// Schedule for rescheduling failed jobs.
///
/// After a failed attempt the job becomes eligible again no earlier than
/// `now + delay(error_count)`, where `error_count` already includes the
/// attempt that just failed.
#[derive(Clone)]
pub enum Backoff {
    /// Fixed delay between attempts.
    Constant(Duration),

    /// `base × factor^(n − 1)` for the n-th failed attempt, capped at `max`.
    Exponential {
        /// Delay after the first failure.
        base: Duration,
        /// Growth factor applied per additional failure.
        factor: f64,
        /// Upper bound on the computed delay.
        max: Duration,
    },

    /// Failed jobs are never rescheduled; the row is discarded instead.
    Never,

    /// User-supplied schedule; `None` means "do not reschedule".
    Custom(Arc<dyn Fn(i32) -> Option<Duration> + Send + Sync>),
}

impl Backoff {
    /// Delay applied when no backoff is configured.
    pub const DEFAULT_DELAY: Duration = Duration::from_secs(30);

    /// The delay before the job with the given `error_count` becomes
    /// eligible again, or `None` when the job must not be rescheduled.
    pub fn delay(&self, error_count: i32) -> Option<Duration> {
        match self {
            Self::Constant(delay) => Some(*delay),
            Self::Exponential { base, factor, max } => {
                let attempt = error_count.max(1);
                let millis = base.as_millis() as f64 * factor.powi(attempt - 1);
                let capped = millis.min(max.as_millis() as f64);
                Some(Duration::from_millis(capped as u64))
            }
            Self::Never => None,
            Self::Custom(f) => f(error_count),
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::Constant(Self::DEFAULT_DELAY)
    }
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constant(delay) => f.debug_tuple("Backoff::Constant").field(delay).finish(),
            Self::Exponential { base, factor, max } => f
                .debug_struct("Backoff::Exponential")
                .field("base", base)
                .field("factor", factor)
                .field("max", max)
                .finish(),
            Self::Never => write!(f, "Backoff::Never"),
            Self::Custom(_) => write!(f, "Backoff::Custom(<function>)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_constant_thirty_seconds() {
        assert_eq!(
            Backoff::default().delay(1),
            Some(Duration::from_secs(30))
        );
        assert_eq!(
            Backoff::default().delay(100),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn constant_ignores_error_count() {
        let backoff = Backoff::Constant(Duration::from_secs(5));
        assert_eq!(backoff.delay(1), Some(Duration::from_secs(5)));
        assert_eq!(backoff.delay(7), Some(Duration::from_secs(5)));
    }

    #[test]
    fn exponential_grows_per_attempt() {
        let backoff = Backoff::Exponential {
            base: Duration::from_secs(1),
            factor: 2.0,
            max: Duration::from_secs(60),
        };

        assert_eq!(backoff.delay(1), Some(Duration::from_secs(1)));
        assert_eq!(backoff.delay(2), Some(Duration::from_secs(2)));
        assert_eq!(backoff.delay(3), Some(Duration::from_secs(4)));
        assert_eq!(backoff.delay(4), Some(Duration::from_secs(8)));
    }

    #[test]
    fn exponential_is_capped_at_max() {
        let backoff = Backoff::Exponential {
            base: Duration::from_secs(10),
            factor: 3.0,
            max: Duration::from_secs(60),
        };

        // 10 × 3³ = 270 seconds uncapped
        assert_eq!(backoff.delay(4), Some(Duration::from_secs(60)));
    }

    #[test]
    fn never_yields_no_delay() {
        assert_eq!(Backoff::Never.delay(1), None);
    }

    #[test]
    fn custom_schedule_is_consulted() {
        let backoff = Backoff::Custom(Arc::new(|error_count| {
            (error_count < 3).then(|| Duration::from_secs(error_count as u64))
        }));

        assert_eq!(backoff.delay(2), Some(Duration::from_secs(2)));
        assert_eq!(backoff.delay(3), None);
    }
}
