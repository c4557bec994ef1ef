//! Attempt budget and backoff between attempts.

use std::time::Duration;

/// Retries allowed beyond the first attempt unless configured otherwise.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// How many times to retry and how long to wait in between.
///
/// Policies are pure data - they describe the schedule but never sleep
/// themselves, so they can be inspected and tested directly.
///
/// Every delay is at least [`min_delay`](RetryPolicy::min_delay) (1ms by
/// default), so a policy can never hot-loop against an unavailable server.
///
/// # Examples
///
/// ```rust
/// use txretry::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::linear(Duration::from_millis(50))
///     .with_max_retries(3);
///
/// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(50)));
/// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(150)));
/// assert_eq!(policy.delay_for_attempt(3), None); // budget spent
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RetryPolicy {
    strategy: RetryStrategy,
    max_retries: u32,
    min_delay: Duration,
    max_delay: Option<Duration>,
    jitter: JitterStrategy,
}

/// The backoff strategy for retry delays.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RetryStrategy {
    /// Fixed delay between attempts.
    Constant(Duration),
    /// Delay increases linearly: base * (attempt + 1).
    Linear {
        /// Base delay duration.
        base: Duration,
    },
    /// Delay doubles: base * 2^attempt.
    Exponential {
        /// Base delay duration.
        base: Duration,
    },
}

/// Strategy for adding randomness to delays.
#[derive(Debug, Clone, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum JitterStrategy {
    /// No jitter applied.
    #[default]
    None,
    /// Add a uniformly random duration in `[0, max)`.
    Additive(Duration),
    /// Add ±percentage randomness to delay.
    Proportional(f64),
}

impl Default for RetryPolicy {
    /// `50ms * (attempt + 1)` plus up to 5ms of jitter, three retries.
    fn default() -> Self {
        Self::linear(Duration::from_millis(50)).with_additive_jitter(Duration::from_millis(5))
    }
}

impl RetryPolicy {
    fn with_strategy(strategy: RetryStrategy) -> Self {
        Self {
            strategy,
            max_retries: DEFAULT_MAX_RETRIES,
            min_delay: Duration::from_millis(1),
            max_delay: None,
            jitter: JitterStrategy::None,
        }
    }

    /// Same delay before every retry.
    ///
    /// ```rust
    /// use txretry::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::constant(Duration::from_millis(500));
    /// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(500)));
    /// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(500)));
    /// ```
    pub fn constant(delay: Duration) -> Self {
        Self::with_strategy(RetryStrategy::Constant(delay))
    }

    /// Delay = base * (attempt + 1)
    pub fn linear(base: Duration) -> Self {
        Self::with_strategy(RetryStrategy::Linear { base })
    }

    /// Delay = base * 2^attempt
    ///
    /// ```rust
    /// use txretry::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy::exponential(Duration::from_millis(100))
    ///     .with_max_retries(5);
    ///
    /// assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(100)));
    /// assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(200)));
    /// assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_millis(400)));
    /// ```
    pub fn exponential(base: Duration) -> Self {
        Self::with_strategy(RetryStrategy::Exponential { base })
    }

    /// Set the maximum number of retry attempts.
    ///
    /// This does not include the initial attempt: `with_max_retries(3)`
    /// means up to 4 attempts in total.
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set the maximum delay cap, applied after jitter.
    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = Some(d);
        self
    }

    /// Set the delay floor. Zero is raised to one millisecond.
    pub fn with_min_delay(mut self, d: Duration) -> Self {
        self.min_delay = d.max(Duration::from_millis(1));
        self
    }

    /// Add ±`factor` proportional jitter, e.g. `0.25` for ±25%.
    ///
    /// The factor is clamped to `[0, 1]`; a non-finite factor disables jitter.
    pub fn with_jitter(mut self, factor: f64) -> Self {
        self.jitter = if factor.is_finite() {
            JitterStrategy::Proportional(factor.clamp(0.0, 1.0))
        } else {
            JitterStrategy::None
        };
        self
    }

    /// Add a uniformly random duration in `[0, max)` to every delay.
    pub fn with_additive_jitter(mut self, max: Duration) -> Self {
        self.jitter = JitterStrategy::Additive(max);
        self
    }

    /// Get the maximum number of retries.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Get the delay floor.
    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }

    /// Get the maximum delay cap.
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// Get the jitter strategy.
    pub fn jitter(&self) -> &JitterStrategy {
        &self.jitter
    }

    /// Get the retry strategy.
    pub fn strategy(&self) -> &RetryStrategy {
        &self.strategy
    }

    /// Delay before retrying after attempt N (0-indexed), without jitter.
    ///
    /// Returns `None` once the retry budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_retries {
            return None;
        }

        let base_delay = match &self.strategy {
            RetryStrategy::Constant(d) => *d,
            RetryStrategy::Linear { base } => base.saturating_mul(attempt + 1),
            RetryStrategy::Exponential { base } => {
                base.saturating_mul(2u32.saturating_pow(attempt))
            }
        };

        Some(self.bound(base_delay))
    }

    /// Delay before retrying after attempt N, with jitter applied.
    pub fn delay_with_jitter(&self, attempt: u32) -> Option<Duration> {
        let base_delay = self.delay_for_attempt(attempt)?;
        Some(self.bound(self.jitter.apply(base_delay)))
    }

    fn bound(&self, delay: Duration) -> Duration {
        let capped = match self.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        };
        capped.max(self.min_delay)
    }
}

impl JitterStrategy {
    /// Apply jitter to a base delay.
    pub fn apply(&self, base_delay: Duration) -> Duration {
        use rand::Rng;

        match self {
            JitterStrategy::None => base_delay,
            JitterStrategy::Additive(max) => {
                let max_nanos = max.as_nanos().min(u64::MAX as u128) as u64;
                if max_nanos == 0 {
                    base_delay
                } else {
                    let extra = rand::rng().random_range(0..max_nanos);
                    base_delay.saturating_add(Duration::from_nanos(extra))
                }
            }
            JitterStrategy::Proportional(factor) => {
                // Deserialized policies bypass `with_jitter`.
                if !factor.is_finite() {
                    return base_delay;
                }
                let factor = factor.clamp(0.0, 1.0);
                let base_millis = base_delay.as_millis() as f64;
                let jitter_range = base_millis * factor;
                let min = (base_millis - jitter_range).max(0.0);
                let max = base_millis + jitter_range;
                if max <= min {
                    base_delay
                } else {
                    let jittered_millis = rand::rng().random_range(min..=max);
                    Duration::from_millis(jittered_millis as u64)
                }
            }
        }
    }
}

#[cfg(test)]
mod policy_tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_matches_linear_with_small_jitter() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(
            policy.strategy(),
            &RetryStrategy::Linear {
                base: Duration::from_millis(50)
            }
        );
        assert_eq!(
            policy.jitter(),
            &JitterStrategy::Additive(Duration::from_millis(5))
        );
    }

    #[test]
    fn test_constant_delay() {
        let policy = RetryPolicy::constant(Duration::from_millis(500));

        assert_eq!(
            policy.delay_for_attempt(0),
            Some(Duration::from_millis(500))
        );
        assert_eq!(
            policy.delay_for_attempt(2),
            Some(Duration::from_millis(500))
        );
        assert_eq!(policy.delay_for_attempt(3), None);
    }

    #[test]
    fn test_linear_delay() {
        let policy = RetryPolicy::linear(Duration::from_millis(50)).with_max_retries(5);

        assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(50)));
        assert_eq!(
            policy.delay_for_attempt(1),
            Some(Duration::from_millis(100))
        );
        assert_eq!(
            policy.delay_for_attempt(4),
            Some(Duration::from_millis(250))
        );
        assert_eq!(policy.delay_for_attempt(5), None);
    }

    #[test]
    fn test_exponential_delay_capped() {
        let policy = RetryPolicy::exponential(Duration::from_millis(100))
            .with_max_retries(10)
            .with_max_delay(Duration::from_millis(500));

        assert_eq!(
            policy.delay_for_attempt(2),
            Some(Duration::from_millis(400))
        );
        assert_eq!(
            policy.delay_for_attempt(3),
            Some(Duration::from_millis(500))
        );
    }

    #[test]
    fn test_zero_delay_is_raised_to_floor() {
        let policy = RetryPolicy::constant(Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(0), Some(Duration::from_millis(1)));

        let policy = policy.with_min_delay(Duration::ZERO);
        assert_eq!(policy.min_delay(), Duration::from_millis(1));
    }

    #[test]
    fn test_zero_retries_has_no_delay() {
        let policy = RetryPolicy::default().with_max_retries(0);
        assert_eq!(policy.delay_for_attempt(0), None);
        assert_eq!(policy.delay_with_jitter(0), None);
    }

    #[test]
    fn test_jitter_none_returns_base_delay() {
        let base = Duration::from_millis(100);
        assert_eq!(JitterStrategy::None.apply(base), base);
    }

    #[test]
    fn test_zero_additive_jitter_returns_base_delay() {
        let base = Duration::from_millis(100);
        assert_eq!(JitterStrategy::Additive(Duration::ZERO).apply(base), base);
    }

    #[test]
    fn test_non_finite_jitter_factor_is_ignored() {
        let policy = RetryPolicy::constant(Duration::from_millis(100)).with_jitter(f64::NAN);
        assert_eq!(policy.jitter(), &JitterStrategy::None);
        assert_eq!(policy.delay_with_jitter(0), Some(Duration::from_millis(100)));

        let policy = RetryPolicy::constant(Duration::from_millis(100)).with_jitter(f64::INFINITY);
        assert_eq!(policy.jitter(), &JitterStrategy::None);
    }

    #[test]
    fn test_out_of_range_proportional_jitter_is_clamped() {
        let base = Duration::from_millis(100);
        for factor in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert_eq!(JitterStrategy::Proportional(factor).apply(base), base);
        }
        for _ in 0..100 {
            let delay = JitterStrategy::Proportional(1e308).apply(base);
            assert!(delay <= Duration::from_millis(200), "{:?}", delay);
        }
    }

    proptest! {
        #[test]
        fn prop_additive_jitter_stays_in_window(
            attempt in 0u32..3,
            jitter_ms in 1u64..50,
        ) {
            let policy = RetryPolicy::linear(Duration::from_millis(50))
                .with_additive_jitter(Duration::from_millis(jitter_ms));
            let base = policy.delay_for_attempt(attempt).unwrap();
            let delay = policy.delay_with_jitter(attempt).unwrap();
            prop_assert!(delay >= base);
            prop_assert!(delay < base + Duration::from_millis(jitter_ms));
        }

        #[test]
        fn prop_proportional_jitter_stays_in_window(
            base_ms in 10u64..1000,
            factor in 0.0f64..1.0,
        ) {
            let policy = RetryPolicy::constant(Duration::from_millis(base_ms))
                .with_jitter(factor);
            let delay = policy.delay_with_jitter(0).unwrap();
            let spread = (base_ms as f64 * factor).ceil() as u64;
            prop_assert!(delay <= Duration::from_millis(base_ms + spread));
            prop_assert!(delay >= Duration::from_millis(1));
        }

        #[test]
        fn prop_delays_never_shrink_and_stay_positive(
            base_ms in 0u64..200,
            retries in 1u32..8,
        ) {
            for policy in [
                RetryPolicy::constant(Duration::from_millis(base_ms)),
                RetryPolicy::linear(Duration::from_millis(base_ms)),
                RetryPolicy::exponential(Duration::from_millis(base_ms)),
            ] {
                let policy = policy.with_max_retries(retries);
                let delays: Vec<_> = (0..retries)
                    .map(|n| policy.delay_for_attempt(n).unwrap())
                    .collect();
                prop_assert!(delays.iter().all(|d| *d > Duration::ZERO));
                prop_assert!(delays.windows(2).all(|w| w[0] <= w[1]));
                prop_assert_eq!(policy.delay_for_attempt(retries), None);
            }
        }
    }
}
