// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Status codes and defaults used when classifying partition failures.

use std::time::Duration;

/// HTTP status returned when a partition key range no longer exists.
pub const STATUS_GONE: u16 = 410;

/// HTTP status returned when a request was rate limited.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Sub-status: the partition key range is gone, usually because it was split.
pub const SUB_STATUS_PARTITION_KEY_RANGE_GONE: u32 = 1002;

/// Sub-status: the partition key range is completing a split.
pub const SUB_STATUS_COMPLETING_SPLIT: u32 = 1007;

/// Sub-status: the partition key range is completing a migration.
pub const SUB_STATUS_COMPLETING_PARTITION_MIGRATION: u32 = 1008;

/// Default page size requested from each partition.
pub const DEFAULT_MAX_ITEM_COUNT: usize = 100;

/// Default number of throttled attempts tolerated by [`ThrottleRetryPolicy`](crate::retry::ThrottleRetryPolicy).
pub const DEFAULT_MAX_THROTTLE_ATTEMPTS: u32 = 9;

/// Default cumulative wait tolerated by [`ThrottleRetryPolicy`](crate::retry::ThrottleRetryPolicy).
pub const DEFAULT_MAX_THROTTLE_WAIT: Duration = Duration::from_secs(30);

/// Default base backoff used when the service does not send a retry-after hint.
pub const DEFAULT_THROTTLE_BACKOFF: Duration = Duration::from_millis(5);
