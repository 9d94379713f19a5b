//! Exponential backoff with jitter.
//!
//! The scheduler carries a running delay across attempts rather than
//! recomputing `initial_delay * factor^n`. Each computed delay, jitter
//! included, becomes the base for the next one:
//!
//! ```text
//! delay_n  = min(current * factor, max_delay) + uniform(-r, +r)
//! current  = delay_n
//! r        = initial_delay * jitter_factor
//! ```
//!
//! With the defaults (1s initial, factor 2, 10% jitter) this produces
//! delays of roughly 2s, 4s, 8s, 16s before the cap at 300s.

use std::time::Duration;

use rand::Rng;

use crate::config::DeliveryConfig;

/// Computes inter-attempt delays for one delivery.
///
/// A scheduler is owned by a single `deliver` call and never shared.
#[derive(Debug, Clone)]
pub struct BackoffScheduler {
    current_delay: Duration,
    max_delay: Duration,
    backoff_factor: f64,
    jitter_range: Duration,
}

impl BackoffScheduler {
    /// Creates a scheduler whose running delay starts at `initial_delay`.
    pub fn new(config: &DeliveryConfig) -> Self {
        Self {
            current_delay: config.initial_delay,
            max_delay: config.max_delay,
            backoff_factor: config.backoff_factor,
            jitter_range: config.jitter_range(),
        }
    }

    /// Returns the running delay the next computation will grow from.
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Returns the capped, unjittered delay the next call will center on.
    pub fn next_base_delay(&self) -> Duration {
        capped_growth(self.current_delay, self.backoff_factor, self.max_delay)
    }

    /// Computes the next delay using the thread-local RNG and advances the
    /// running delay.
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::rng())
    }

    /// Computes the next delay with the given RNG and advances the running
    /// delay.
    pub fn next_delay_with<R: Rng>(&mut self, rng: &mut R) -> Duration {
        let base = self.next_base_delay();
        let delay = apply_jitter(base, self.jitter_range, rng);
        self.current_delay = delay;
        delay
    }
}

/// Multiplies `current` by `factor` and caps the result at `max_delay`.
fn capped_growth(current: Duration, factor: f64, max_delay: Duration) -> Duration {
    let grown = current.as_secs_f64() * factor;
    if !grown.is_finite() || grown >= max_delay.as_secs_f64() {
        return max_delay;
    }
    Duration::try_from_secs_f64(grown.max(0.0)).unwrap_or(max_delay)
}

/// Adds a uniform offset in `[-range, +range]`, clamping at zero.
fn apply_jitter<R: Rng>(base: Duration, range: Duration, rng: &mut R) -> Duration {
    if range.is_zero() {
        return base;
    }

    let range_secs = range.as_secs_f64();
    let offset = rng.random_range(-range_secs..=range_secs);
    // Saturates near Duration::MAX.
    Duration::try_from_secs_f64((base.as_secs_f64() + offset).max(0.0))
        .unwrap_or_else(|_| base.saturating_add(range))
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    fn no_jitter_config() -> DeliveryConfig {
        DeliveryConfig::default().with_jitter_factor(0.0)
    }

    #[test]
    fn exponential_backoff_increases_correctly() {
        let mut scheduler = BackoffScheduler::new(&no_jitter_config());

        let delays = (0..4).map(|_| scheduler.next_delay()).collect::<Vec<_>>();

        assert_eq!(delays, vec![
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8),
            Duration::from_secs(16),
        ]);
    }

    #[test]
    fn max_delay_enforced() {
        let config = no_jitter_config().with_delays(Duration::from_secs(1), Duration::from_secs(5));
        let mut scheduler = BackoffScheduler::new(&config);

        let delays = (0..5).map(|_| scheduler.next_delay()).collect::<Vec<_>>();

        assert_eq!(delays[0], Duration::from_secs(2));
        assert_eq!(delays[1], Duration::from_secs(4));
        assert!(delays[2..].iter().all(|delay| *delay == Duration::from_secs(5)));
    }

    #[test]
    fn jitter_is_carried_into_running_delay() {
        let config = DeliveryConfig::default().with_jitter_factor(0.5);
        let mut scheduler = BackoffScheduler::new(&config);
        let mut rng = StdRng::seed_from_u64(7);

        let first = scheduler.next_delay_with(&mut rng);
        assert_eq!(scheduler.current_delay(), first);

        let expected_base = first.mul_f64(2.0);
        assert_eq!(scheduler.next_base_delay(), expected_base);
    }

    #[test]
    fn jitter_varies_delay_within_range() {
        let config = DeliveryConfig::default().with_jitter_factor(0.5);
        let mut seen = std::collections::HashSet::new();

        for _ in 0..20 {
            let mut scheduler = BackoffScheduler::new(&config);
            let delay = scheduler.next_delay();
            seen.insert(delay.as_millis());

            // base 2s, range 0.5s
            assert!(delay >= Duration::from_millis(1_500), "delay too small: {delay:?}");
            assert!(delay <= Duration::from_millis(2_500), "delay too large: {delay:?}");
        }

        assert!(seen.len() > 1, "jitter should create variation");
    }

    #[test]
    fn delay_never_negative() {
        let config = DeliveryConfig::default()
            .with_delays(Duration::from_millis(10), Duration::from_millis(10))
            .with_jitter_factor(1.0);
        let mut rng = StdRng::seed_from_u64(42);

        for _ in 0..100 {
            let mut scheduler = BackoffScheduler::new(&config);
            let delay = scheduler.next_delay_with(&mut rng);
            assert!(delay <= Duration::from_millis(20));
        }
    }

    #[test]
    fn delays_near_duration_max_do_not_overflow() {
        let config = DeliveryConfig::default()
            .with_delays(Duration::MAX, Duration::MAX)
            .with_jitter_factor(1.0);
        let mut scheduler = BackoffScheduler::new(&config);
        let mut rng = StdRng::seed_from_u64(3);

        for _ in 0..50 {
            let delay = scheduler.next_delay_with(&mut rng);
            assert!(delay > Duration::ZERO);
        }
    }

    #[test]
    fn capped_growth_saturates_on_overflow() {
        let grown = capped_growth(Duration::from_secs(u64::MAX / 2), 4.0, Duration::from_secs(60));
        assert_eq!(grown, Duration::from_secs(60));
    }
}
