// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Producers that drive a query across the partition key ranges of a container.
//!
//! A cross-partition query is executed by running a single-partition query against every partition key range.
//! Each range is driven by a [`PartitionProducer`], which pages through the range, retries throttled requests,
//! and transparently moves on to the child ranges when the range is split.
//! The partition producers are composed by either an [`OrderedMergeProducer`] (for `ORDER BY` queries) or an
//! [`UnorderedFanoutProducer`], selected once by [`QueryProducer::new`].
//!
//! The producers never talk to the service directly. Requests are sent through a [`RequestIssuer`], and split
//! partitions are resolved through a [`PartitionResolver`], both provided by the caller in a [`ProducerContext`].

mod ordered;
mod partition;
mod unordered;

pub use ordered::OrderedMergeProducer;
pub use partition::PartitionProducer;
pub use unordered::UnorderedFanoutProducer;

pub(crate) use partition::Step;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use futures::Stream;

use crate::{
    continuation::CompositeContinuationToken,
    models::{ItemComparator, PartitionKeyRange, PartitionKeyRangeId, ResultPage},
    retry::{RetryPolicy, ThrottleRetryPolicy},
    FetchFailure, QueryProducerOptions,
};

/// Sends a single-partition query request.
#[async_trait]
pub trait RequestIssuer<T>: Send + Sync {
    /// Fetches one page of results from `range`.
    ///
    /// `continuation` is `None` for the first page of a partition. `max_item_count` is the page size, which never
    /// changes for the lifetime of a partition producer.
    async fn fetch(
        &self,
        range: &PartitionKeyRange,
        continuation: Option<&str>,
        max_item_count: usize,
    ) -> Result<ResultPage<T>, FetchFailure>;
}

/// Resolves the ranges that replaced a split partition key range.
#[async_trait]
pub trait PartitionResolver: Send + Sync {
    /// Returns the child ranges of the split range, ordered by `min_inclusive`.
    ///
    /// The children must be contiguous and cover the parent's span exactly.
    async fn resolve_children(
        &self,
        pkrange_id: &PartitionKeyRangeId,
    ) -> Result<Vec<PartitionKeyRange>, FetchFailure>;
}

/// The collaborators shared by every producer of a query.
pub struct ProducerContext<T> {
    pub(crate) issuer: Arc<dyn RequestIssuer<T>>,
    pub(crate) resolver: Arc<dyn PartitionResolver>,
    pub(crate) retry_policy: Arc<dyn RetryPolicy>,
}

impl<T> ProducerContext<T> {
    /// Creates a context using the default [`ThrottleRetryPolicy`].
    pub fn new(issuer: Arc<dyn RequestIssuer<T>>, resolver: Arc<dyn PartitionResolver>) -> Self {
        Self {
            issuer,
            resolver,
            retry_policy: Arc::new(ThrottleRetryPolicy::default()),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = retry_policy;
        self
    }
}

impl<T> Clone for ProducerContext<T> {
    fn clone(&self) -> Self {
        Self {
            issuer: Arc::clone(&self.issuer),
            resolver: Arc::clone(&self.resolver),
            retry_policy: Arc::clone(&self.retry_policy),
        }
    }
}

impl<T> fmt::Debug for ProducerContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerContext").finish_non_exhaustive()
    }
}

/// Produces the pages of a cross-partition query.
///
/// The variant is chosen once, when the producer is created: queries with an `ORDER BY` comparator are merged in
/// order, other queries interleave partition pages as they arrive.
pub enum QueryProducer<T> {
    Ordered(OrderedMergeProducer<T>),
    Unordered(UnorderedFanoutProducer<T>),
}

impl<T: Send + 'static> QueryProducer<T> {
    /// Creates a producer for a query over `ranges`.
    ///
    /// # Arguments
    ///
    /// * `ranges` - The partition key ranges of the container. Ignored when resuming from a `continuation`.
    /// * `order_by` - The comparator of an `ORDER BY` query, or `None` for an unordered query.
    /// * `context` - The collaborators used to send requests and resolve splits.
    /// * `options` - Page size and concurrency options.
    /// * `continuation` - A continuation token returned by a previous producer for the same query, if resuming.
    #[tracing::instrument(level = "debug", skip_all, err, fields(ordered = order_by.is_some(), resuming = continuation.is_some()))]
    pub fn new(
        ranges: Vec<PartitionKeyRange>,
        order_by: Option<Arc<dyn ItemComparator<T>>>,
        context: ProducerContext<T>,
        options: QueryProducerOptions,
        continuation: Option<&str>,
    ) -> crate::Result<Self> {
        let producers = partition_producers(ranges, &context, &options, continuation)?;
        tracing::debug!(partitions = producers.len(), "creating query producer");

        let producer = match order_by {
            Some(comparator) => {
                tracing::debug!("using ordered merge producer");
                QueryProducer::Ordered(OrderedMergeProducer::new(producers, comparator, &options))
            }
            None => {
                tracing::debug!("using unordered fan-out producer");
                QueryProducer::Unordered(UnorderedFanoutProducer::new(producers, &options))
            }
        };
        Ok(producer)
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self, QueryProducer::Ordered(_))
    }

    /// Produces the next page of the query, or `None` once every partition is exhausted.
    ///
    /// After an error is returned, the producer is terminated and every further call returns `None`.
    pub async fn next_page(&mut self) -> crate::Result<Option<ResultPage<T>>> {
        match self {
            QueryProducer::Ordered(producer) => producer.next_page().await,
            QueryProducer::Unordered(producer) => producer.next_page().await,
        }
    }

    /// Converts the producer into a stream of pages.
    ///
    /// The stream ends after the last page, or right after yielding the first error.
    pub fn into_stream(self) -> impl Stream<Item = crate::Result<ResultPage<T>>> + Send {
        futures::stream::unfold(Some(self), |state| async move {
            let mut producer = state?;
            match producer.next_page().await {
                Ok(Some(page)) => Some((Ok(page), Some(producer))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl<T> fmt::Debug for QueryProducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryProducer::Ordered(_) => write!(f, "Ordered"),
            QueryProducer::Unordered(_) => write!(f, "Unordered"),
        }
    }
}

fn partition_producers<T: Send + 'static>(
    mut ranges: Vec<PartitionKeyRange>,
    context: &ProducerContext<T>,
    options: &QueryProducerOptions,
    continuation: Option<&str>,
) -> crate::Result<Vec<PartitionProducer<T>>> {
    let max_item_count = options.max_item_count.max(1);
    let Some(continuation) = continuation else {
        ranges.sort_by(|a, b| a.min_inclusive().cmp(b.min_inclusive()));
        return Ok(ranges
            .into_iter()
            .map(|range| {
                PartitionProducer::new(range, None, max_item_count, context.clone())
            })
            .collect());
    };

    let token: CompositeContinuationToken = continuation.parse()?;
    let mut partitions = token.into_partitions();
    partitions.sort_by(|a, b| a.range.min_inclusive().cmp(b.range.min_inclusive()));
    tracing::debug!(
        partitions = partitions.len(),
        "resuming query from continuation"
    );

    Ok(partitions
        .into_iter()
        .map(|partition| {
            PartitionProducer::new(
                partition.range,
                partition.token,
                max_item_count,
                context.clone(),
            )
            .with_skip(partition.skip)
        })
        .collect())
}
