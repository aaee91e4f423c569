// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::{cmp::Ordering, collections::VecDeque, sync::Arc};

use futures::{stream::FuturesUnordered, StreamExt};

use crate::{
    continuation::{CompositeContinuationToken, PartitionContinuation},
    models::{ItemComparator, OrderByItem, ResultPage},
    producer::{PartitionProducer, Step},
    QueryProducerOptions,
};

/// One partition taking part in the merge, with the page currently buffered from it.
struct MergeSlot<T> {
    producer: PartitionProducer<T>,
    buffer: VecDeque<T>,
    /// The continuation token that fetched the buffered page.
    page_token: Option<String>,
    /// How many items of the buffered page were already emitted, or skipped on resume.
    emitted: usize,
}

impl<T: Send + 'static> MergeSlot<T> {
    fn new(producer: PartitionProducer<T>) -> Self {
        let page_token = producer.continuation().map(str::to_string);
        Self {
            producer,
            buffer: VecDeque::new(),
            page_token,
            emitted: 0,
        }
    }

    fn min_inclusive(&self) -> &str {
        self.producer.range().min_inclusive()
    }

    fn needs_fetch(&self) -> bool {
        self.buffer.is_empty() && !self.producer.is_exhausted()
    }

    fn is_drained(&self) -> bool {
        self.buffer.is_empty() && self.producer.is_exhausted()
    }

    async fn fetch(mut self) -> (Self, crate::Result<Step<T>>) {
        let token = self.producer.continuation().map(str::to_string);
        let skipped = self.producer.pending_skip();
        let outcome = self.producer.step().await;
        if let Ok(Step::Page(_)) = &outcome {
            self.page_token = token;
            self.emitted = skipped;
        }
        (self, outcome)
    }

    fn resume_point(&self) -> PartitionContinuation {
        let range = self.producer.range().clone();
        if self.buffer.is_empty() {
            PartitionContinuation::new(range, self.producer.continuation().map(str::to_string))
                .with_skip(self.producer.pending_skip())
        } else {
            PartitionContinuation::new(range, self.page_token.clone()).with_skip(self.emitted)
        }
    }
}

/// Merges the ordered results of several partitions into one globally ordered sequence.
///
/// Each partition returns its rows already sorted. The merge buffers one page per partition and repeatedly emits the
/// smallest head item according to the query comparator. Rows that compare equal are emitted in ascending order of
/// their partition's `min_inclusive`, which makes the merged order deterministic.
///
/// A partition whose buffer runs dry is refilled before the next item is chosen; refills of different partitions run
/// concurrently. A split partition is replaced by its children.
pub struct OrderedMergeProducer<T> {
    slots: Vec<MergeSlot<T>>,
    comparator: Arc<dyn ItemComparator<T>>,
    page_size: usize,
    concurrency: usize,
    terminated: bool,
}

impl<T: Send + 'static> OrderedMergeProducer<T> {
    pub fn new(
        producers: Vec<PartitionProducer<T>>,
        comparator: Arc<dyn ItemComparator<T>>,
        options: &QueryProducerOptions,
    ) -> Self {
        Self {
            slots: producers.into_iter().map(MergeSlot::new).collect(),
            comparator,
            page_size: options.max_item_count.max(1),
            concurrency: options.concurrency_limit(),
            terminated: false,
        }
    }

    /// The number of partitions that may still contribute items.
    pub fn active_partitions(&self) -> usize {
        self.slots.len()
    }

    /// Returns the next page of at most `max_item_count` merged items.
    ///
    /// A partition failure ends the merge with that error, discarding any items already merged into the page.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn next_page(&mut self) -> crate::Result<Option<ResultPage<T>>> {
        if self.terminated {
            return Ok(None);
        }

        let mut items = Vec::new();
        while items.len() < self.page_size {
            if let Err(e) = self.refill().await {
                self.terminate();
                return Err(e);
            }
            match self.pop_min() {
                Some(item) => items.push(item),
                None => break,
            }
        }

        // Refill now so the continuation reflects whether anything is left.
        if let Err(e) = self.refill().await {
            self.terminate();
            return Err(e);
        }

        if items.is_empty() && self.slots.is_empty() {
            tracing::debug!("all partitions exhausted");
            self.terminated = true;
            return Ok(None);
        }

        let continuation = CompositeContinuationToken::encode(
            self.slots.iter().map(MergeSlot::resume_point).collect(),
        )?;
        tracing::trace!(item_count = items.len(), "emitting merged page");
        Ok(Some(ResultPage::new(items, continuation)))
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.slots.clear();
    }

    /// Fetches pages until every remaining slot has buffered items, dropping drained slots and replacing split ones.
    async fn refill(&mut self) -> crate::Result<()> {
        if !self.slots.iter().any(|slot| slot.buffer.is_empty()) {
            return Ok(());
        }

        let mut fetched = false;
        loop {
            let (needy, ready): (Vec<_>, Vec<_>) = std::mem::take(&mut self.slots)
                .into_iter()
                .filter(|slot| !slot.is_drained())
                .partition(MergeSlot::needs_fetch);
            self.slots = ready;

            if needy.is_empty() {
                // Keeps the continuation listing partitions in range order.
                if fetched {
                    self.slots
                        .sort_by(|a, b| a.min_inclusive().cmp(b.min_inclusive()));
                }
                return Ok(());
            }
            fetched = true;

            let mut pending = needy.into_iter();
            let mut in_flight = FuturesUnordered::new();
            loop {
                while in_flight.len() < self.concurrency {
                    let Some(slot) = pending.next() else {
                        break;
                    };
                    in_flight.push(slot.fetch());
                }

                let Some((mut slot, outcome)) = in_flight.next().await else {
                    break;
                };

                match outcome? {
                    Step::Page(page) => {
                        slot.buffer.extend(page.items);
                        self.slots.push(slot);
                    }
                    Step::Split => {
                        let children = slot.producer.take_children();
                        tracing::debug!(
                            pkrange_id = %slot.producer.range().id(),
                            children = children.len(),
                            "replacing split partition with its children"
                        );
                        self.slots.extend(children.into_iter().map(MergeSlot::new));
                    }
                    Step::Done => {}
                }
            }
        }
    }

    fn pop_min(&mut self) -> Option<T> {
        let comparator = self.comparator.as_ref();
        let mut best: Option<(usize, OrderByItem<'_, T>)> = None;
        for (index, slot) in self.slots.iter().enumerate() {
            let Some(item) = slot.buffer.front() else {
                continue;
            };
            let candidate = OrderByItem {
                item,
                source_min_inclusive: slot.min_inclusive(),
            };
            let replace = match &best {
                None => true,
                Some((_, current)) => candidate.compare(current, comparator) == Ordering::Less,
            };
            if replace {
                best = Some((index, candidate));
            }
        }

        let index = best.map(|(index, _)| index)?;
        let slot = &mut self.slots[index];
        slot.emitted += 1;
        slot.buffer.pop_front()
    }
}
