// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Retry policies applied to throttled partition requests.

use std::time::Duration;

use crate::{constants, FailureKind, FetchFailure};

/// The outcome of consulting a [`RetryPolicy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry the same request, with the same continuation token, after the delay.
    Retry(Duration),
    /// Stop retrying and fail the query.
    GiveUp,
}

/// Decides whether a throttled partition request should be retried.
pub trait RetryPolicy: Send + Sync {
    /// Called after each throttling failure.
    ///
    /// `attempt` is the number of consecutive throttling failures observed for the same request *before* this one,
    /// so it is `0` the first time a request is throttled.
    fn on_failure(&self, failure: &FetchFailure, attempt: u32) -> RetryDecision;
}

/// A [`RetryPolicy`] for rate-limited requests.
///
/// The delay is the service's retry-after hint when present, otherwise an exponential backoff starting at
/// [`backoff`](ThrottleRetryPolicyBuilder::with_backoff). The policy gives up after `max_attempts` retries, or when a
/// single delay would exceed `max_wait`.
#[derive(Clone, Debug)]
pub struct ThrottleRetryPolicy {
    max_attempts: u32,
    max_wait: Duration,
    backoff: Duration,
}

impl Default for ThrottleRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_MAX_THROTTLE_ATTEMPTS,
            max_wait: constants::DEFAULT_MAX_THROTTLE_WAIT,
            backoff: constants::DEFAULT_THROTTLE_BACKOFF,
        }
    }
}

impl ThrottleRetryPolicy {
    /// Creates a new [`ThrottleRetryPolicyBuilder`] that can be used to construct a [`ThrottleRetryPolicy`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::time::Duration;
    /// use azure_data_cosmos_query::retry::ThrottleRetryPolicy;
    ///
    /// let policy = ThrottleRetryPolicy::builder()
    ///     .with_max_attempts(3)
    ///     .with_backoff(Duration::from_millis(100))
    ///     .build();
    /// assert_eq!(3, policy.max_attempts());
    /// ```
    pub fn builder() -> ThrottleRetryPolicyBuilder {
        ThrottleRetryPolicyBuilder::default()
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

impl RetryPolicy for ThrottleRetryPolicy {
    fn on_failure(&self, failure: &FetchFailure, attempt: u32) -> RetryDecision {
        if failure.kind() != FailureKind::Throttle || attempt >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let delay = failure
            .retry_after()
            .unwrap_or_else(|| self.backoff_for(attempt));
        if delay > self.max_wait {
            return RetryDecision::GiveUp;
        }

        RetryDecision::Retry(delay)
    }
}

/// Builder used to construct a [`ThrottleRetryPolicy`].
#[derive(Default)]
pub struct ThrottleRetryPolicyBuilder(ThrottleRetryPolicy);

impl ThrottleRetryPolicyBuilder {
    /// Sets how many times a single request may be retried.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.0.max_attempts = max_attempts;
        self
    }

    /// Sets the longest single delay the policy is willing to wait.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.0.max_wait = max_wait;
        self
    }

    /// Sets the base delay used when the service sends no retry-after hint.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.0.backoff = backoff;
        self
    }

    /// Builds a [`ThrottleRetryPolicy`] from the builder.
    ///
    /// This does not consume the builder, and can be called multiple times.
    pub fn build(&self) -> ThrottleRetryPolicy {
        self.0.clone()
    }
}
