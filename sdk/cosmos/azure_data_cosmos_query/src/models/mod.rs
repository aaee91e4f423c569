// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Model types for partitions, result pages and `ORDER BY` values.

mod order_by;
mod partition_key_range;
mod result_page;

pub use order_by::*;
pub use partition_key_range::*;
pub use result_page::*;
