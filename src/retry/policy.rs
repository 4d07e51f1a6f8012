use crate::config::{validate_retry_config, RetryConfig};
use crate::ConfigError;
use std::time::Duration;

/// Retry parameters, validated at construction
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    tries: u32,
    initial_delay: Duration,
    backoff: f64,
    max_delay: Duration,
    initial_timeout: Duration,
    timeout_increment: Duration,
    max_timeout: Duration,
}

/// One planned attempt: its timeout budget and the wait that follows a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt {
    /// 1-based attempt number
    pub number: u32,
    pub timeout: Duration,
    /// `None` for the final attempt
    pub delay_after: Option<Duration>,
}

impl RetryPolicy {
    /// Builds a policy from the `[retry]` section
    pub fn from_config(config: &RetryConfig) -> Result<Self, ConfigError> {
        validate_retry_config(config)?;
        Ok(Self {
            tries: config.tries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff: config.backoff,
            max_delay: Duration::from_millis(config.max_delay_ms),
            initial_timeout: Duration::from_secs(config.initial_timeout_secs),
            timeout_increment: Duration::from_secs(config.timeout_increment_secs),
            max_timeout: Duration::from_secs(config.max_timeout_secs),
        })
    }

    /// Builds a policy from explicit values
    ///
    /// Fails when `tries` is zero, `backoff` is below 1.0, or a cap is lower
    /// than its starting value.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tries: u32,
        initial_delay: Duration,
        backoff: f64,
        max_delay: Duration,
        initial_timeout: Duration,
        timeout_increment: Duration,
        max_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        if tries < 1 {
            return Err(ConfigError::Validation("tries must be >= 1".to_string()));
        }
        if !backoff.is_finite() || backoff < 1.0 {
            return Err(ConfigError::Validation(format!(
                "backoff must be a finite value >= 1.0, got {}",
                backoff
            )));
        }
        if max_delay < initial_delay {
            return Err(ConfigError::Validation(
                "max_delay must be >= initial_delay".to_string(),
            ));
        }
        if initial_timeout.is_zero() || max_timeout < initial_timeout {
            return Err(ConfigError::Validation(
                "timeouts must be positive with max_timeout >= initial_timeout".to_string(),
            ));
        }

        Ok(Self {
            tries,
            initial_delay,
            backoff,
            max_delay,
            initial_timeout,
            timeout_increment,
            max_timeout,
        })
    }

    pub fn tries(&self) -> u32 {
        self.tries
    }

    pub fn initial_timeout(&self) -> Duration {
        self.initial_timeout
    }

    /// The full attempt plan for a call
    ///
    /// A `requested` timeout larger than the configured initial timeout is
    /// used for the first attempt; later attempts never go below it.
    pub fn schedule(&self, requested: Option<Duration>) -> Vec<Attempt> {
        let mut backoff = Backoff::start(self, requested);
        let mut plan = Vec::with_capacity(self.tries as usize);
        loop {
            let number = backoff.attempt;
            let timeout = backoff.timeout;
            if number >= self.tries {
                plan.push(Attempt {
                    number,
                    timeout,
                    delay_after: None,
                });
                return plan;
            }
            let delay = backoff.delay;
            plan.push(Attempt {
                number,
                timeout,
                delay_after: Some(delay),
            });
            backoff.advance(self);
        }
    }
}

/// Mutable escalation state shared by the async and blocking executors
#[derive(Debug, Clone, Copy)]
pub(crate) struct Backoff {
    pub attempt: u32,
    pub timeout: Duration,
    pub delay: Duration,
    timeout_cap: Duration,
}

impl Backoff {
    pub(crate) fn start(policy: &RetryPolicy, requested: Option<Duration>) -> Self {
        let timeout = match requested {
            Some(requested) if requested > policy.initial_timeout => requested,
            _ => policy.initial_timeout,
        };
        Self {
            attempt: 1,
            timeout,
            delay: policy.initial_delay,
            timeout_cap: policy.max_timeout.max(timeout),
        }
    }

    pub(crate) fn exhausted(&self, policy: &RetryPolicy) -> bool {
        self.attempt >= policy.tries
    }

    pub(crate) fn advance(&mut self, policy: &RetryPolicy) {
        self.attempt += 1;
        self.timeout = self
            .timeout
            .saturating_add(policy.timeout_increment)
            .min(self.timeout_cap);

        // Capped in f64 first; the raw product can exceed Duration::MAX
        let secs = (self.delay.as_secs_f64() * policy.backoff).min(policy.max_delay.as_secs_f64());
        self.delay = Duration::try_from_secs_f64(secs)
            .unwrap_or(policy.max_delay)
            .min(policy.max_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::new(
            5,
            Duration::from_secs(1),
            2.0,
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(15),
            Duration::from_secs(30),
        )
        .unwrap()
    }

    #[test]
    fn test_schedule_escalates_delay_and_timeout() {
        let plan = policy().schedule(None);
        assert_eq!(plan.len(), 5);

        let delays: Vec<_> = plan.iter().map(|a| a.delay_after).collect();
        assert_eq!(
            delays,
            vec![
                Some(Duration::from_secs(1)),
                Some(Duration::from_secs(2)),
                Some(Duration::from_secs(4)),
                Some(Duration::from_secs(5)),
                None,
            ]
        );

        let timeouts: Vec<_> = plan.iter().map(|a| a.timeout.as_secs()).collect();
        assert_eq!(timeouts, vec![10, 25, 30, 30, 30]);
    }

    #[test]
    fn test_delays_are_non_decreasing_and_capped() {
        let plan = policy().schedule(None);
        let delays: Vec<_> = plan.iter().filter_map(|a| a.delay_after).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= Duration::from_secs(5)));
    }

    #[test]
    fn test_requested_timeout_wins_when_larger() {
        let plan = policy().schedule(Some(Duration::from_secs(45)));
        assert_eq!(plan[0].timeout, Duration::from_secs(45));
        assert!(plan.iter().all(|a| a.timeout >= Duration::from_secs(45)));
    }

    #[test]
    fn test_requested_timeout_ignored_when_smaller() {
        let plan = policy().schedule(Some(Duration::from_secs(2)));
        assert_eq!(plan[0].timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_single_try_has_no_delay() {
        let policy = RetryPolicy::new(
            1,
            Duration::from_millis(10),
            2.0,
            Duration::from_millis(10),
            Duration::from_secs(1),
            Duration::ZERO,
            Duration::from_secs(1),
        )
        .unwrap();
        let plan = policy.schedule(None);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].delay_after, None);
    }

    #[test]
    fn test_huge_backoff_saturates_at_max_delay() {
        let policy = RetryPolicy::new(
            6,
            Duration::from_secs(1),
            1e300,
            Duration::MAX,
            Duration::from_secs(1),
            Duration::MAX,
            Duration::MAX,
        )
        .unwrap();
        let plan = policy.schedule(None);
        assert_eq!(plan.len(), 6);
        assert_eq!(plan[0].delay_after, Some(Duration::from_secs(1)));
        assert!(plan[1..5]
            .iter()
            .all(|a| a.delay_after == Some(Duration::MAX)));
        assert_eq!(plan[5].timeout, Duration::MAX);
    }

    #[test]
    fn test_invalid_parameters_fail_fast() {
        let base = |tries, backoff| {
            RetryPolicy::new(
                tries,
                Duration::from_secs(1),
                backoff,
                Duration::from_secs(5),
                Duration::from_secs(1),
                Duration::from_secs(1),
                Duration::from_secs(2),
            )
        };
        assert!(base(0, 2.0).is_err());
        assert!(base(3, 0.9).is_err());
        assert!(base(3, f64::NAN).is_err());
        assert!(base(3, 1.0).is_ok());
    }

    #[test]
    fn test_from_default_config() {
        let policy = RetryPolicy::from_config(&RetryConfig::default()).unwrap();
        assert_eq!(policy.tries(), 5);
        assert_eq!(policy.initial_timeout(), Duration::from_secs(30));
    }
}
