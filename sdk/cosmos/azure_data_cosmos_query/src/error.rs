// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Error types for cross-partition query production.

use std::{fmt, time::Duration};

use crate::constants;

/// A specialized `Result` type for query producer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies a failure reported by a [`RequestIssuer`](crate::producer::RequestIssuer) or
/// [`PartitionResolver`](crate::producer::PartitionResolver).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The partition key range no longer exists; it was split into child ranges.
    Split,
    /// The request was rate limited and may be retried.
    Throttle,
    /// Any other failure. These are never retried by the producers.
    Other,
}

impl FailureKind {
    /// Classifies a service response by its HTTP status and optional sub-status.
    ///
    /// `410 Gone` with a split or migration sub-status maps to [`FailureKind::Split`],
    /// `429 Too Many Requests` maps to [`FailureKind::Throttle`], and everything else maps to [`FailureKind::Other`].
    pub fn from_status(status: u16, sub_status: Option<u32>) -> Self {
        match (status, sub_status) {
            (
                constants::STATUS_GONE,
                Some(
                    constants::SUB_STATUS_PARTITION_KEY_RANGE_GONE
                    | constants::SUB_STATUS_COMPLETING_SPLIT
                    | constants::SUB_STATUS_COMPLETING_PARTITION_MIGRATION,
                ),
            ) => FailureKind::Split,
            (constants::STATUS_TOO_MANY_REQUESTS, _) => FailureKind::Throttle,
            _ => FailureKind::Other,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::Split => write!(f, "partition split"),
            FailureKind::Throttle => write!(f, "throttled"),
            FailureKind::Other => write!(f, "request failed"),
        }
    }
}

/// A failure reported by one of the external collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchFailure {
    kind: FailureKind,
    retry_after: Option<Duration>,
    message: String,
}

impl FetchFailure {
    /// Creates a new failure of the given kind.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retry_after: None,
            message: message.into(),
        }
    }

    /// Creates a failure signalling that the partition key range was split.
    pub fn split(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Split, message)
    }

    /// Creates a throttling failure, with the retry-after hint sent by the service, if any.
    pub fn throttled(retry_after: Option<Duration>) -> Self {
        Self {
            kind: FailureKind::Throttle,
            retry_after,
            message: "request rate is large".to_string(),
        }
    }

    /// Creates a non-retriable failure.
    pub fn other(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Other, message)
    }

    /// Sets the retry-after hint.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// The delay the service asked the client to wait before retrying, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The kind of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A request to a partition failed with a non-retriable failure.
    Fetch,
    /// A partition stayed throttled after the retry policy gave up.
    ThrottleRetriesExhausted,
    /// The child ranges of a split partition could not be resolved.
    ChildResolution,
    /// The resolved child ranges do not exactly cover the split partition.
    InvalidChildRanges,
    /// A continuation token could not be used to resume the query.
    InvalidContinuation,
    /// A value could not be serialized or deserialized.
    Json,
}

/// An error that terminates a query.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates an error with a message and no underlying cause.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates an error wrapping an underlying cause.
    pub fn full<E>(kind: ErrorKind, error: E, message: impl Into<String>) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self {
            kind,
            message: message.into(),
            source: Some(error.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the collaborator failure that caused this error, if there was one.
    pub fn failure(&self) -> Option<&FetchFailure> {
        self.source
            .as_deref()
            .and_then(|source| source.downcast_ref::<FetchFailure>())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::full(ErrorKind::Json, error, "JSON (de)serialization failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_split_statuses() {
        for sub_status in [1002, 1007, 1008] {
            assert_eq!(
                FailureKind::Split,
                FailureKind::from_status(410, Some(sub_status))
            );
        }
        assert_eq!(FailureKind::Other, FailureKind::from_status(410, None));
        assert_eq!(FailureKind::Other, FailureKind::from_status(410, Some(1000)));
    }

    #[test]
    fn classify_throttle_and_other() {
        assert_eq!(FailureKind::Throttle, FailureKind::from_status(429, None));
        assert_eq!(
            FailureKind::Throttle,
            FailureKind::from_status(429, Some(3200))
        );
        assert_eq!(FailureKind::Other, FailureKind::from_status(500, None));
        assert_eq!(FailureKind::Other, FailureKind::from_status(404, Some(0)));
    }

    #[test]
    fn error_exposes_failure() {
        let failure = FetchFailure::other("boom");
        let error = Error::full(ErrorKind::Fetch, failure.clone(), "request failed");

        assert_eq!(ErrorKind::Fetch, error.kind());
        assert_eq!(Some(&failure), error.failure());
        assert_eq!("request failed", error.to_string());
    }

    #[test]
    fn error_without_failure() {
        let error = Error::new(ErrorKind::InvalidContinuation, "bad token");
        assert!(error.failure().is_none());
    }

    #[test]
    fn throttled_failure_carries_retry_after() {
        let failure = FetchFailure::throttled(Some(Duration::from_millis(250)));
        assert_eq!(FailureKind::Throttle, failure.kind());
        assert_eq!(Some(Duration::from_millis(250)), failure.retry_after());
        assert_eq!("throttled: request rate is large", failure.to_string());
    }
}
