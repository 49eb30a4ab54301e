use std::time::Duration;

use rand::Rng;

use crate::error::FetchError;

/// Upstream retry-after hints are honoured up to this long.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60 * 60);

/// Uniform retry delay in `[0, ceiling)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryJitter {
    ceiling: Duration,
}

impl RetryJitter {
    pub fn new(ceiling: Duration) -> Self {
        Self { ceiling }
    }

    pub fn ceiling(self) -> Duration {
        self.ceiling
    }

    /// A zero ceiling always yields zero.
    pub fn sample(self) -> Duration {
        let ceiling_ms = u64::try_from(self.ceiling.as_millis()).unwrap_or(u64::MAX);
        if ceiling_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..ceiling_ms))
    }

    /// Delay before retrying after `error`: any upstream retry-after
    /// (capped at [`MAX_RETRY_AFTER`]), plus a fresh sample.
    pub fn delay_for(self, error: &FetchError) -> Duration {
        let floor = error
            .retry_after()
            .unwrap_or_default()
            .min(MAX_RETRY_AFTER);
        floor.saturating_add(self.sample())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn samples_stay_below_ceiling_and_vary() {
        let jitter = RetryJitter::new(Duration::from_secs(10));
        let samples: Vec<Duration> = (0..200).map(|_| jitter.sample()).collect();
        assert!(samples.iter().all(|d| *d < Duration::from_secs(10)));

        let distinct: HashSet<Duration> = samples.into_iter().collect();
        assert!(distinct.len() > 1, "retry delays must not be fixed");
    }

    #[test]
    fn zero_ceiling_means_no_delay() {
        assert_eq!(RetryJitter::new(Duration::ZERO).sample(), Duration::ZERO);
    }

    #[test]
    fn retry_after_is_a_floor() {
        let jitter = RetryJitter::new(Duration::from_millis(500));
        let err = FetchError::RateLimited {
            retry_after_secs: Some(3),
        };
        for _ in 0..50 {
            let delay = jitter.delay_for(&err);
            assert!(delay >= Duration::from_secs(3));
            assert!(delay < Duration::from_millis(3_500));
        }
        assert!(jitter.delay_for(&FetchError::transient("x")) < Duration::from_millis(500));
    }

    #[test]
    fn huge_retry_after_is_capped() {
        let jitter = RetryJitter::new(Duration::from_secs(10));
        let err = FetchError::RateLimited {
            retry_after_secs: Some(u64::MAX),
        };
        let delay = jitter.delay_for(&err);
        assert!(delay >= MAX_RETRY_AFTER);
        assert!(delay < MAX_RETRY_AFTER + Duration::from_secs(10));

        let unbounded = RetryJitter::new(Duration::MAX);
        assert!(unbounded.delay_for(&err) >= MAX_RETRY_AFTER);
    }
}
