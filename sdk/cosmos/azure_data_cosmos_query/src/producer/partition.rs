// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::{collections::VecDeque, fmt};

use futures::{future::BoxFuture, Stream};

use crate::{
    models::{PartitionKeyRange, ResultPage},
    producer::ProducerContext,
    retry::RetryDecision,
    Error, ErrorKind, FailureKind, FetchFailure,
};

enum State<T> {
    /// Fetching pages directly from the range.
    Active,
    /// The range was split; pages come from the children, in range order.
    Forwarding(VecDeque<PartitionProducer<T>>),
    /// No more pages.
    Exhausted,
}

impl<T> fmt::Debug for State<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Active => write!(f, "Active"),
            State::Forwarding(children) => write!(f, "Forwarding({} children)", children.len()),
            State::Exhausted => write!(f, "Exhausted"),
        }
    }
}

/// The result of a single [`PartitionProducer::step`].
pub(crate) enum Step<T> {
    /// A page was fetched from the range.
    Page(ResultPage<T>),
    /// The range was split. The children can be taken with [`PartitionProducer::take_children`].
    Split,
    /// The range has no more pages.
    Done,
}

/// Pages through a single partition key range.
///
/// Each request carries the continuation token returned by the previous page, and the same page size.
/// Throttled requests are retried, unchanged, according to the context's [`RetryPolicy`](crate::retry::RetryPolicy).
///
/// When the range turns out to have been split, the producer resolves the child ranges and creates one child producer
/// per range, each seeded with the last continuation token this producer observed. From then on the producer only
/// forwards the pages of its children.
pub struct PartitionProducer<T> {
    range: PartitionKeyRange,
    continuation: Option<String>,
    max_item_count: usize,
    skip: usize,
    state: State<T>,
    context: ProducerContext<T>,
}

impl<T> fmt::Debug for PartitionProducer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionProducer")
            .field("range", &self.range)
            .field("continuation", &self.continuation)
            .field("max_item_count", &self.max_item_count)
            .field("state", &self.state)
            .finish()
    }
}

impl<T: Send + 'static> PartitionProducer<T> {
    /// Creates a producer for `range`.
    ///
    /// The first request uses `initial_continuation` verbatim, so `None` starts from the beginning of the range.
    pub fn new(
        range: PartitionKeyRange,
        initial_continuation: Option<String>,
        max_item_count: usize,
        context: ProducerContext<T>,
    ) -> Self {
        Self {
            range,
            continuation: initial_continuation,
            max_item_count,
            skip: 0,
            state: State::Active,
            context,
        }
    }

    /// Drops the first `skip` items of the first page, which were already returned before the query was resumed.
    ///
    /// The skip is discarded if the range is split before its first page is fetched. The children replay the parent's
    /// token with no skip, so rows of that page that were already returned before the query was resumed can be
    /// returned again. The skip counts rows of the parent's page and cannot be mapped onto the children's pages.
    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn range(&self) -> &PartitionKeyRange {
        &self.range
    }

    /// The continuation token the next request will use.
    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    pub fn max_item_count(&self) -> usize {
        self.max_item_count
    }

    pub(crate) fn pending_skip(&self) -> usize {
        self.skip
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, State::Exhausted)
    }

    /// Indicates if the range was split and this producer now forwards to its children.
    pub fn is_split(&self) -> bool {
        matches!(self.state, State::Forwarding(_))
    }

    /// Takes the child producers of a split range, leaving this producer exhausted.
    ///
    /// Returns an empty list if the range was not split.
    pub(crate) fn take_children(&mut self) -> Vec<PartitionProducer<T>> {
        match std::mem::replace(&mut self.state, State::Exhausted) {
            State::Forwarding(children) => children.into(),
            other => {
                self.state = other;
                Vec::new()
            }
        }
    }

    /// Returns the next page from this range or, once split, from its children.
    ///
    /// Children are drained one after another, in range order.
    pub fn next_page(&mut self) -> BoxFuture<'_, crate::Result<Option<ResultPage<T>>>> {
        Box::pin(async move {
            loop {
                match &mut self.state {
                    State::Exhausted => return Ok(None),
                    State::Forwarding(children) => {
                        let Some(child) = children.front_mut() else {
                            self.state = State::Exhausted;
                            return Ok(None);
                        };
                        match child.next_page().await? {
                            Some(page) => return Ok(Some(page)),
                            None => {
                                children.pop_front();
                            }
                        }
                    }
                    State::Active => match self.step().await? {
                        Step::Page(page) => return Ok(Some(page)),
                        Step::Split => continue,
                        Step::Done => return Ok(None),
                    },
                }
            }
        })
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

    /// Performs a single transition of the state machine.
    ///
    /// An active producer fetches one page, retrying throttled requests, or handles a split.
    /// A split producer returns [`Step::Split`] until its children are taken.
    #[tracing::instrument(level = "debug", skip_all, fields(pkrange_id = %self.range.id(), continuation = ?self.continuation))]
    pub(crate) async fn step(&mut self) -> crate::Result<Step<T>> {
        match self.state {
            State::Active => {}
            State::Forwarding(_) => return Ok(Step::Split),
            State::Exhausted => return Ok(Step::Done),
        }

        let mut attempt = 0;
        loop {
            let result = self
                .context
                .issuer
                .fetch(
                    &self.range,
                    self.continuation.as_deref(),
                    self.max_item_count,
                )
                .await;

            let failure = match result {
                Ok(page) => return Ok(Step::Page(self.accept(page))),
                Err(failure) => failure,
            };

            match failure.kind() {
                FailureKind::Split => {
                    self.split(failure).await?;
                    return Ok(Step::Split);
                }
                FailureKind::Throttle => {
                    match self.context.retry_policy.on_failure(&failure, attempt) {
                        RetryDecision::Retry(delay) => {
                            tracing::debug!(attempt, ?delay, "request throttled, retrying");
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        RetryDecision::GiveUp => {
                            tracing::debug!(attempt, "request throttled, giving up");
                            let message = format!(
                                "partition key range {} is still throttled after {} retries",
                                self.range.id(),
                                attempt
                            );
                            return Err(Error::full(
                                ErrorKind::ThrottleRetriesExhausted,
                                failure,
                                message,
                            ));
                        }
                    }
                }
                FailureKind::Other => {
                    let message =
                        format!("request to partition key range {} failed", self.range.id());
                    return Err(Error::full(ErrorKind::Fetch, failure, message));
                }
            }
        }
    }

    fn accept(&mut self, mut page: ResultPage<T>) -> ResultPage<T> {
        if self.skip > 0 {
            let skip = self.skip.min(page.items.len());
            page.items.drain(..skip);
            self.skip = 0;
        }

        tracing::trace!(
            item_count = page.items.len(),
            next_continuation = ?page.continuation,
            "received page"
        );

        self.continuation = page.continuation.clone();
        if self.continuation.is_none() {
            tracing::debug!("partition key range exhausted");
            self.state = State::Exhausted;
        }
        page
    }

    async fn split(&mut self, failure: FetchFailure) -> crate::Result<()> {
        tracing::debug!(%failure, "partition key range is gone, resolving child ranges");

        let children = self
            .context
            .resolver
            .resolve_children(self.range.id())
            .await
            .map_err(|e| {
                let message = format!(
                    "failed to resolve the child ranges of partition key range {}",
                    self.range.id()
                );
                Error::full(ErrorKind::ChildResolution, e, message)
            })?;
        self.range.validate_children(&children)?;

        tracing::debug!(
            children = ?children.iter().map(|c| c.id().value()).collect::<Vec<_>>(),
            "partition key range was split"
        );

        // Every child resumes from the parent's last acknowledged token.
        let producers = children
            .into_iter()
            .map(|range| {
                PartitionProducer::new(
                    range,
                    self.continuation.clone(),
                    self.max_item_count,
                    self.context.clone(),
                )
            })
            .collect();
        self.skip = 0;
        self.state = State::Forwarding(producers);
        Ok(())
    }
}
