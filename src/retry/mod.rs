//! Retry with backoff for flaky network operations
//!
//! Two quantities escalate between attempts:
//! - the delay before the next attempt (multiplied by `backoff`, capped at `max_delay`)
//! - the timeout budget of the next attempt (grown by `timeout_increment`, capped at `max_timeout`)
//!
//! Only errors reporting themselves as transient are retried. Anything else,
//! and the last transient error once attempts are exhausted, is returned to
//! the caller unchanged.

mod executor;
mod policy;

pub use executor::RetryExecutor;
pub use policy::{Attempt, RetryPolicy};

use crate::HarvestError;
use std::time::Duration;

/// Errors the executor knows how to classify
pub trait RetryableError: std::error::Error {
    /// Whether another attempt may succeed
    fn is_transient(&self) -> bool;

    /// The error reported when an attempt exceeds its timeout budget
    fn attempt_timed_out(after: Duration) -> Self;
}

impl RetryableError for HarvestError {
    fn is_transient(&self) -> bool {
        HarvestError::is_transient(self)
    }

    fn attempt_timed_out(after: Duration) -> Self {
        HarvestError::AttemptTimeout { after }
    }
}
