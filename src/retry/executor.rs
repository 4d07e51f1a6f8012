use super::policy::{Backoff, RetryPolicy};
use super::RetryableError;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Runs fallible operations under a [`RetryPolicy`]
///
/// The operation receives the timeout budget of the current attempt. The
/// async variant also enforces that budget; the blocking variant can only
/// hand it on (sync clients apply it to their sockets).
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs an async operation, sleeping without blocking between attempts
    ///
    /// # Arguments
    ///
    /// * `what` - Label used in retry warnings (usually the target URL)
    /// * `requested` - Caller's timeout; used for the first attempt when it
    ///   exceeds the policy's initial timeout
    /// * `op` - The operation, called once per attempt with that attempt's timeout
    ///
    /// # Returns
    ///
    /// The first success, the first non-transient error, or the last
    /// transient error once every attempt has failed.
    pub async fn call<T, E, F, Fut>(
        &self,
        what: &str,
        requested: Option<Duration>,
        mut op: F,
    ) -> Result<T, E>
    where
        E: RetryableError,
        F: FnMut(Duration) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut backoff = Backoff::start(&self.policy, requested);

        loop {
            let budget = backoff.timeout;
            let outcome = match tokio::time::timeout(budget, op(budget)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(E::attempt_timed_out(budget)),
            };

            match self.classify(what, outcome, &backoff) {
                Step::Done(result) => return result,
                Step::Retry => {
                    tokio::time::sleep(backoff.delay).await;
                    backoff.advance(&self.policy);
                }
            }
        }
    }

    /// Runs a blocking operation, sleeping the current thread between attempts
    ///
    /// Only call this from a blocking context such as
    /// `tokio::task::spawn_blocking`.
    pub fn call_blocking<T, E, F>(
        &self,
        what: &str,
        requested: Option<Duration>,
        mut op: F,
    ) -> Result<T, E>
    where
        E: RetryableError,
        F: FnMut(Duration) -> Result<T, E>,
    {
        let mut backoff = Backoff::start(&self.policy, requested);

        loop {
            let outcome = op(backoff.timeout);
            match self.classify(what, outcome, &backoff) {
                Step::Done(result) => return result,
                Step::Retry => {
                    std::thread::sleep(backoff.delay);
                    backoff.advance(&self.policy);
                }
            }
        }
    }

    fn classify<T, E: RetryableError>(
        &self,
        what: &str,
        outcome: Result<T, E>,
        backoff: &Backoff,
    ) -> Step<T, E> {
        let error = match outcome {
            Ok(value) => {
                if backoff.attempt > 1 {
                    debug!(target_op = what, attempt = backoff.attempt, "Succeeded after retry");
                }
                return Step::Done(Ok(value));
            }
            Err(error) => error,
        };

        if !error.is_transient() {
            return Step::Done(Err(error));
        }

        if backoff.exhausted(&self.policy) {
            warn!(
                target_op = what,
                attempts = backoff.attempt,
                error = %error,
                "Retries exhausted"
            );
            return Step::Done(Err(error));
        }

        warn!(
            target_op = what,
            attempt = backoff.attempt,
            tries = self.policy.tries(),
            error = %error,
            timeout_ms = backoff.timeout.as_millis() as u64,
            next_delay_ms = backoff.delay.as_millis() as u64,
            "Transient failure, retrying"
        );
        Step::Retry
    }
}

enum Step<T, E> {
    Done(Result<T, E>),
    Retry,
}
