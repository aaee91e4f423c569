// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::collections::{BTreeMap, VecDeque};

use futures::{future::BoxFuture, stream::FuturesUnordered, StreamExt};

use crate::{
    continuation::{CompositeContinuationToken, PartitionContinuation},
    models::ResultPage,
    producer::{PartitionProducer, Step},
    QueryProducerOptions,
};

type InFlight<T> = BoxFuture<'static, (PartitionProducer<T>, crate::Result<Step<T>>)>;

/// Interleaves the pages of several partitions, in whatever order they arrive.
///
/// Each active partition has at most one request in flight. Pages are relayed exactly as the partition returned them,
/// including empty pages. There is no ordering guarantee across partitions.
pub struct UnorderedFanoutProducer<T> {
    idle: VecDeque<PartitionProducer<T>>,
    in_flight: FuturesUnordered<InFlight<T>>,
    /// The resume point of every live partition, keyed by `min_inclusive`.
    ///
    /// Tokens only advance when a page is handed to the caller, so a page fetched but not yet returned is fetched again on resume.
    resume: BTreeMap<String, PartitionContinuation>,
    concurrency: usize,
    terminated: bool,
}

impl<T: Send + 'static> UnorderedFanoutProducer<T> {
    pub fn new(producers: Vec<PartitionProducer<T>>, options: &QueryProducerOptions) -> Self {
        let resume = producers
            .iter()
            .map(|p| {
                (
                    p.range().min_inclusive().to_string(),
                    PartitionContinuation::new(p.range().clone(), p.continuation().map(str::to_string))
                        .with_skip(p.pending_skip()),
                )
            })
            .collect();
        Self {
            idle: producers.into(),
            in_flight: FuturesUnordered::new(),
            resume,
            concurrency: options.concurrency_limit(),
            terminated: false,
        }
    }

    /// The number of partitions that may still return pages.
    pub fn active_partitions(&self) -> usize {
        self.resume.len()
    }

    /// Returns the next page from whichever partition responds first.
    pub async fn next_page(&mut self) -> crate::Result<Option<ResultPage<T>>> {
        if self.terminated {
            return Ok(None);
        }

        loop {
            self.dispatch();

            let Some((mut producer, outcome)) = self.in_flight.next().await else {
                tracing::debug!("all partitions exhausted");
                self.terminated = true;
                return Ok(None);
            };
            let key = producer.range().min_inclusive().to_string();

            let step = match outcome {
                Ok(step) => step,
                Err(e) => {
                    self.terminate();
                    return Err(e);
                }
            };

            match step {
                Step::Page(page) => {
                    if producer.is_exhausted() {
                        self.resume.remove(&key);
                    } else {
                        if let Some(entry) = self.resume.get_mut(&key) {
                            entry.token = page.continuation.clone();
                            entry.skip = 0;
                        }
                        self.idle.push_back(producer);
                    }

                    tracing::trace!(pkrange_id = %key, item_count = page.items.len(), "relaying page");
                    let continuation = CompositeContinuationToken::encode(
                        self.resume.values().cloned().collect(),
                    )?;
                    return Ok(Some(ResultPage::new(page.items, continuation)));
                }
                Step::Split => {
                    let token = self
                        .resume
                        .remove(&key)
                        .and_then(|entry| entry.token);
                    let children = producer.take_children();
                    tracing::debug!(
                        pkrange_id = %producer.range().id(),
                        children = children.len(),
                        "replacing split partition with its children"
                    );
                    for child in children {
                        self.resume.insert(
                            child.range().min_inclusive().to_string(),
                            PartitionContinuation::new(child.range().clone(), token.clone()),
                        );
                        self.idle.push_back(child);
                    }
                }
                Step::Done => {
                    self.resume.remove(&key);
                }
            }
        }
    }

    fn dispatch(&mut self) {
        while self.in_flight.len() < self.concurrency {
            let Some(mut producer) = self.idle.pop_front() else {
                break;
            };
            self.in_flight.push(Box::pin(async move {
                let outcome = producer.step().await;
                (producer, outcome)
            }));
        }
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.idle.clear();
        self.in_flight = FuturesUnordered::new();
        self.resume.clear();
    }
}
