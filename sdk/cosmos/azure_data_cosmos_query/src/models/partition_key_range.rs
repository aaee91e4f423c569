// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, ErrorKind};

/// The identifier of a partition key range.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct PartitionKeyRangeId(String);

impl PartitionKeyRangeId {
    /// Creates a new partition key range ID from a string value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the inner string value.
    pub fn value(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKeyRangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionKeyRangeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PartitionKeyRangeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A contiguous range of the effective partition key space, served by one physical partition.
///
/// Ranges are immutable. A split invalidates the range and replaces it with two or more child ranges
/// that together cover exactly `[min_inclusive, max_exclusive)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionKeyRange {
    id: PartitionKeyRangeId,
    min_inclusive: String,
    max_exclusive: String,
}

impl PartitionKeyRange {
    pub fn new(
        id: impl Into<PartitionKeyRangeId>,
        min_inclusive: impl Into<String>,
        max_exclusive: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            min_inclusive: min_inclusive.into(),
            max_exclusive: max_exclusive.into(),
        }
    }

    pub fn id(&self) -> &PartitionKeyRangeId {
        &self.id
    }

    pub fn min_inclusive(&self) -> &str {
        &self.min_inclusive
    }

    pub fn max_exclusive(&self) -> &str {
        &self.max_exclusive
    }

    /// Indicates if the effective partition key falls within this range.
    pub fn contains(&self, effective_partition_key: &str) -> bool {
        self.min_inclusive.as_str() <= effective_partition_key
            && effective_partition_key < self.max_exclusive.as_str()
    }

    /// Checks that `children` can replace this range after a split.
    ///
    /// The children must be ordered, contiguous, non-empty, distinct from this range,
    /// and cover exactly this range's span.
    pub fn validate_children(&self, children: &[PartitionKeyRange]) -> crate::Result<()> {
        let invalid = |reason: String| {
            Err(Error::new(
                ErrorKind::InvalidChildRanges,
                format!(
                    "invalid child ranges for partition key range {}: {}",
                    self.id, reason
                ),
            ))
        };

        let (Some(first), Some(last)) = (children.first(), children.last()) else {
            return invalid("no child ranges were resolved".to_string());
        };

        if first.min_inclusive != self.min_inclusive {
            return invalid(format!(
                "first child starts at '{}' but the parent starts at '{}'",
                first.min_inclusive, self.min_inclusive
            ));
        }
        if last.max_exclusive != self.max_exclusive {
            return invalid(format!(
                "last child ends at '{}' but the parent ends at '{}'",
                last.max_exclusive, self.max_exclusive
            ));
        }

        for child in children {
            if child.id == self.id {
                return invalid(format!("child {} has the same ID as its parent", child.id));
            }
            if child.min_inclusive >= child.max_exclusive {
                return invalid(format!("child {} has an empty range", child.id));
            }
        }

        for pair in children.windows(2) {
            if pair[0].max_exclusive != pair[1].min_inclusive {
                return invalid(format!(
                    "gap or overlap between child {} (ends at '{}') and child {} (starts at '{}')",
                    pair[0].id, pair[0].max_exclusive, pair[1].id, pair[1].min_inclusive
                ));
            }
        }

        Ok(())
    }
}
