// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use crate::constants;

#[cfg(doc)]
use crate::producer::QueryProducer;

/// Options used to construct a [`QueryProducer`].
#[derive(Clone, Debug)]
pub struct QueryProducerOptions {
    /// The page size requested from every partition.
    ///
    /// Fixed for the lifetime of the producer and inherited by the children of split partitions.
    /// Ordered queries also use it as the size of the pages they return. Values below 1 are treated as 1.
    pub max_item_count: usize,

    /// The maximum number of partitions with a request in flight at the same time.
    ///
    /// `None` allows one request per active partition.
    pub max_concurrency: Option<usize>,
}

impl Default for QueryProducerOptions {
    fn default() -> Self {
        Self {
            max_item_count: constants::DEFAULT_MAX_ITEM_COUNT,
            max_concurrency: None,
        }
    }
}

impl QueryProducerOptions {
    /// Creates a new [`QueryProducerOptionsBuilder`](QueryProducerOptionsBuilder) that can be used to construct a [`QueryProducerOptions`].
    ///
    /// # Examples
    ///
    /// ```rust
    /// let options = azure_data_cosmos_query::QueryProducerOptions::builder()
    ///     .with_max_item_count(25)
    ///     .build();
    /// assert_eq!(25, options.max_item_count);
    /// ```
    pub fn builder() -> QueryProducerOptionsBuilder {
        QueryProducerOptionsBuilder::default()
    }

    pub(crate) fn concurrency_limit(&self) -> usize {
        self.max_concurrency.unwrap_or(usize::MAX).max(1)
    }
}

/// Builder used to construct a [`QueryProducerOptions`].
///
/// Obtain a [`QueryProducerOptionsBuilder`] by calling [`QueryProducerOptions::builder()`]
#[derive(Default)]
pub struct QueryProducerOptionsBuilder(QueryProducerOptions);

impl QueryProducerOptionsBuilder {
    /// Sets the page size requested from every partition. Values below 1 are raised to 1.
    pub fn with_max_item_count(mut self, max_item_count: usize) -> Self {
        self.0.max_item_count = max_item_count.max(1);
        self
    }

    /// Limits how many partitions may have a request in flight at once. Values below 1 are raised to 1.
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.0.max_concurrency = Some(max_concurrency.max(1));
        self
    }

    /// Builds a [`QueryProducerOptions`] from the builder.
    ///
    /// This does not consume the builder, and can be called multiple times.
    pub fn build(&self) -> QueryProducerOptions {
        self.0.clone()
    }
}
