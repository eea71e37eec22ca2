//! Data-driven retry policy for transient fetch failures.

use std::time::Duration;

use rand::Rng;

/// Bounded exponential backoff with jitter.
///
/// The policy is plain data interpreted by the fetch loop; there is no
/// recursive retry control flow anywhere.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Relative jitter applied to each delay, e.g. 0.2 for +/-20%.
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: Duration::from_secs(15),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Policy that never retries. Used in tests and for local sources.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the retry following failure number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.multiplier.powi(attempt.min(31) as i32);
        let base = self.initial.as_secs_f64() * exp;
        let capped = base.min(self.max_delay.as_secs_f64());

        let jittered = if self.jitter > 0.0 {
            let factor = 1.0 + rand::rng().random_range(-self.jitter..=self.jitter);
            capped * factor.max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(jittered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> BackoffPolicy {
        BackoffPolicy {
            jitter: 0.0,
            ..BackoffPolicy::default()
        }
    }

    #[test]
    fn test_delays_grow_exponentially() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
    }

    #[test]
    fn test_delay_capped() {
        let policy = no_jitter();
        assert_eq!(policy.delay_for(20), policy.max_delay);
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = BackoffPolicy::default();
        for attempt in 0..5 {
            let base = no_jitter().delay_for(attempt).as_secs_f64();
            let d = policy.delay_for(attempt).as_secs_f64();
            assert!(d >= base * 0.79 && d <= base * 1.21, "delay {d} out of band");
        }
    }
}
