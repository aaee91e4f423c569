// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Continuation tokens for resuming a cross-partition query.
//!
//! A partition's own continuation token is opaque and only valid for that partition (or, right after a split, for
//! its children). The token returned by a [`QueryProducer`](crate::QueryProducer) therefore lists every partition
//! that still has results, together with the partition token to replay and how many items of the replayed page
//! were already returned.
//!
//! The string format is a JSON document, for example:
//!
//! ```json
//! {"partitions":[{"range":{"id":"2","minInclusive":"","maxExclusive":"80"},"token":"+RID:~a","skip":3}]}
//! ```

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{models::PartitionKeyRange, Error, ErrorKind};

fn is_zero(value: &usize) -> bool {
    *value == 0
}

/// The resume point of a single partition.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionContinuation {
    /// The partition key range to resume.
    pub range: PartitionKeyRange,

    /// The partition continuation token to replay. `None` restarts the partition from the beginning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// The number of leading items of the replayed page that were already returned to the caller.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub skip: usize,
}

impl PartitionContinuation {
    pub fn new(range: PartitionKeyRange, token: Option<String>) -> Self {
        Self {
            range,
            token,
            skip: 0,
        }
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }
}

/// The continuation token of a whole cross-partition query.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CompositeContinuationToken {
    partitions: Vec<PartitionContinuation>,
}

impl CompositeContinuationToken {
    pub fn new(partitions: Vec<PartitionContinuation>) -> Self {
        Self { partitions }
    }

    pub fn partitions(&self) -> &[PartitionContinuation] {
        &self.partitions
    }

    pub fn into_partitions(self) -> Vec<PartitionContinuation> {
        self.partitions
    }

    /// Serializes the token, returning `None` when no partition has anything left to return.
    pub(crate) fn encode(partitions: Vec<PartitionContinuation>) -> crate::Result<Option<String>> {
        if partitions.is_empty() {
            return Ok(None);
        }
        let token = serde_json::to_string(&Self::new(partitions))?;
        Ok(Some(token))
    }
}

impl FromStr for CompositeContinuationToken {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token: CompositeContinuationToken = serde_json::from_str(s).map_err(|e| {
            Error::full(
                ErrorKind::InvalidContinuation,
                e,
                "continuation token is not a valid cross-partition continuation",
            )
        })?;

        if token.partitions.is_empty() {
            return Err(Error::new(
                ErrorKind::InvalidContinuation,
                "continuation token does not reference any partition",
            ));
        }

        let mut ranges: Vec<&PartitionKeyRange> =
            token.partitions.iter().map(|p| &p.range).collect();
        ranges.sort_by(|a, b| a.min_inclusive().cmp(b.min_inclusive()));
        for pair in ranges.windows(2) {
            if pair[0].max_exclusive() > pair[1].min_inclusive() {
                return Err(Error::new(
                    ErrorKind::InvalidContinuation,
                    format!(
                        "continuation token contains overlapping partition key ranges {} and {}",
                        pair[0].id(),
                        pair[1].id()
                    ),
                ));
            }
        }

        Ok(token)
    }
}

impl fmt::Display for CompositeContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(id: &str, min: &str, max: &str) -> PartitionKeyRange {
        PartitionKeyRange::new(id, min, max)
    }

    #[test]
    fn encode_empty_is_none() {
        assert_eq!(None, CompositeContinuationToken::encode(vec![]).unwrap());
    }

    #[test]
    fn encode_then_parse() {
        let partitions = vec![
            PartitionContinuation::new(range("1", "", "80"), Some("t1".into())).with_skip(2),
            PartitionContinuation::new(range("2", "80", "FF"), None),
        ];
        let token = CompositeContinuationToken::encode(partitions.clone())
            .unwrap()
            .unwrap();
        let parsed: CompositeContinuationToken = token.parse().unwrap();
        assert_eq!(partitions, parsed.into_partitions());
    }

    #[test]
    fn default_fields_are_omitted() {
        let token = CompositeContinuationToken::new(vec![PartitionContinuation::new(
            range("2", "80", "FF"),
            None,
        )]);
        assert_eq!(
            r#"{"partitions":[{"range":{"id":"2","minInclusive":"80","maxExclusive":"FF"}}]}"#,
            token.to_string()
        );
    }

    #[test]
    fn parse_garbage_fails() {
        let err = "not json".parse::<CompositeContinuationToken>().unwrap_err();
        assert_eq!(ErrorKind::InvalidContinuation, err.kind());
    }

    #[test]
    fn parse_empty_partitions_fails() {
        let err = r#"{"partitions":[]}"#
            .parse::<CompositeContinuationToken>()
            .unwrap_err();
        assert_eq!(ErrorKind::InvalidContinuation, err.kind());
    }

    #[test]
    fn parse_overlapping_ranges_fails() {
        let token = CompositeContinuationToken::new(vec![
            PartitionContinuation::new(range("1", "", "90"), None),
            PartitionContinuation::new(range("2", "80", "FF"), None),
        ])
        .to_string();
        let err = token.parse::<CompositeContinuationToken>().unwrap_err();
        assert_eq!(ErrorKind::InvalidContinuation, err.kind());
    }
}
