//! ---
//! narxr_section: "04-service"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Broker client facade and messaging patterns."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
use std::time::Duration;

use narxr_common::config::{RetryBackoff, RetryPolicyConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::sleep;

const DEFAULT_SEED: u64 = 0xDEADBEEF;

/// Attempt budget and pacing for one messaging pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `None` retries forever.
    pub max_attempts: Option<usize>,
    /// Delay before the second attempt.
    pub delay: Duration,
    /// Growth of the delay between attempts.
    pub backoff: RetryBackoff,
    /// Upper bound for exponential growth.
    pub max_delay: Duration,
    /// Maximum random delay added to every pause.
    pub jitter: Duration,
    seed: u64,
}

impl RetryPolicy {
    /// A single attempt.
    pub fn fail_fast() -> Self {
        Self::bounded(1, Duration::ZERO)
    }

    /// At most `max_attempts` attempts with a fixed delay.
    pub fn bounded(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts.max(1)),
            delay,
            backoff: RetryBackoff::Fixed,
            max_delay: delay,
            jitter: Duration::ZERO,
            seed: DEFAULT_SEED,
        }
    }

    /// Attempts without limit and a fixed delay.
    pub fn unlimited(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            ..Self::bounded(1, delay)
        }
    }

    /// Seed the jitter RNG for deterministic testing.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Delay after the given attempt (1-indexed).
    fn delay_after(&self, attempt: usize, rng: &mut StdRng) -> Duration {
        let base = match self.backoff {
            RetryBackoff::Fixed => self.delay,
            RetryBackoff::Exponential => {
                let exponent = (attempt.saturating_sub(1) as u32).min(16);
                self.delay
                    .saturating_mul(2u32.pow(exponent))
                    .min(self.max_delay.max(self.delay))
            }
        };
        if self.jitter.is_zero() {
            base
        } else {
            let jitter_ms = rng.gen_range(0..=self.jitter.as_millis().max(1)) as u64;
            base + Duration::from_millis(jitter_ms)
        }
    }

    /// Start tracking attempts for one call.
    pub fn schedule(&self) -> RetrySchedule {
        RetrySchedule {
            policy: self.clone(),
            attempt: 0,
            rng: StdRng::seed_from_u64(self.seed),
        }
    }
}

impl From<&RetryPolicyConfig> for RetryPolicy {
    fn from(config: &RetryPolicyConfig) -> Self {
        Self {
            max_attempts: (!config.is_unlimited()).then_some(config.max_attempts),
            delay: config.delay,
            backoff: config.backoff,
            max_delay: config.max_delay,
            jitter: config.jitter,
            seed: DEFAULT_SEED,
        }
    }
}

/// Attempt counter for a single retried call.
#[derive(Debug)]
pub struct RetrySchedule {
    policy: RetryPolicy,
    attempt: usize,
    rng: StdRng,
}

impl RetrySchedule {
    /// Record the start of another attempt and return its 1-indexed number.
    pub fn next_attempt(&mut self) -> usize {
        self.attempt += 1;
        self.attempt
    }

    /// Attempts started so far.
    pub fn attempts(&self) -> usize {
        self.attempt
    }

    /// Whether the budget is spent.
    pub fn is_exhausted(&self) -> bool {
        matches!(self.policy.max_attempts, Some(max) if self.attempt >= max)
    }

    /// Pause before the next attempt.
    pub async fn wait(&mut self) {
        let delay = self.policy.delay_after(self.attempt, &mut self.rng);
        if !delay.is_zero() {
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_conversion_maps_zero_to_unlimited() {
        let policy = RetryPolicy::from(&RetryPolicyConfig::unlimited());
        assert_eq!(policy.max_attempts, None);
        let policy = RetryPolicy::from(&RetryPolicyConfig::fail_fast());
        assert_eq!(policy.max_attempts, Some(1));
    }

    #[test]
    fn bounded_schedule_exhausts() {
        let mut schedule = RetryPolicy::bounded(3, Duration::ZERO).schedule();
        for expected in 1..=3 {
            assert!(!schedule.is_exhausted());
            assert_eq!(schedule.next_attempt(), expected);
        }
        assert!(schedule.is_exhausted());
    }

    #[test]
    fn unlimited_schedule_never_exhausts() {
        let mut schedule = RetryPolicy::unlimited(Duration::from_millis(1)).schedule();
        for _ in 0..1_000 {
            schedule.next_attempt();
        }
        assert!(!schedule.is_exhausted());
        assert_eq!(schedule.attempts(), 1_000);
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let policy = RetryPolicy {
            backoff: RetryBackoff::Exponential,
            max_delay: Duration::from_millis(350),
            ..RetryPolicy::bounded(10, Duration::from_millis(100))
        };
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(policy.delay_after(1, &mut rng), Duration::from_millis(100));
        assert_eq!(policy.delay_after(2, &mut rng), Duration::from_millis(200));
        assert_eq!(policy.delay_after(3, &mut rng), Duration::from_millis(350));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            jitter: Duration::from_millis(5),
            ..RetryPolicy::bounded(2, Duration::from_millis(10))
        }
        .with_seed(42);
        let mut rng = StdRng::seed_from_u64(42);
        for attempt in 1..20 {
            let delay = policy.delay_after(attempt, &mut rng);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(15));
        }
    }

    #[tokio::test]
    async fn wait_sleeps_for_the_configured_delay() {
        let mut schedule = RetryPolicy::bounded(2, Duration::from_millis(5)).schedule();
        schedule.next_attempt();
        let started = std::time::Instant::now();
        schedule.wait().await;
        assert!(started.elapsed() >= Duration::from_millis(5));
    }
}
