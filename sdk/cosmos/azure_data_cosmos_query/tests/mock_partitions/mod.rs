// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

#![allow(dead_code)]

use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use azure_data_cosmos_query::{
    models::{PartitionKeyRange, PartitionKeyRangeId, ResultPage},
    producer::{PartitionResolver, ProducerContext, RequestIssuer},
    FetchFailure,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

/// Routes producer logs to the test output. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MockItem {
    pub id: String,
    pub partition_key: String,
    pub merge_order: usize,
}

/// Orders items by `merge_order`, the way an `ORDER BY c.mergeOrder` query would.
pub fn by_merge_order(left: &MockItem, right: &MockItem) -> Ordering {
    left.merge_order.cmp(&right.merge_order)
}

/// Builds `page_count` pages of `page_len` items for `partition_key`.
///
/// Item `n` of the partition gets the merge order `first_order + n * stride`, so every page is sorted.
pub fn pages(
    partition_key: &str,
    page_count: usize,
    page_len: usize,
    first_order: usize,
    stride: usize,
) -> Vec<Vec<MockItem>> {
    (0..page_count)
        .map(|p| {
            (0..page_len)
                .map(|i| {
                    let n = p * page_len + i;
                    MockItem {
                        id: format!("{partition_key}-{n}"),
                        partition_key: partition_key.to_string(),
                        merge_order: first_order + n * stride,
                    }
                })
                .collect()
        })
        .collect()
}

/// A request observed by a [`MockContainer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRequest {
    pub pkrange_id: String,
    pub continuation: Option<String>,
    pub max_item_count: usize,
}

/// Records every request sent to a [`MockContainer`]. Owned by the test, shared with the container.
#[derive(Clone, Default)]
pub struct RequestRecorder(Arc<Mutex<Vec<RecordedRequest>>>);

impl RequestRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, request: RecordedRequest) {
        self.0.lock().unwrap().push(request);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.0.lock().unwrap().clone()
    }

    pub fn for_partition(&self, pkrange_id: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.pkrange_id == pkrange_id)
            .collect()
    }
}

struct MockPartition {
    pages: Vec<Vec<MockItem>>,
    /// The page index at which the partition reports that it is gone.
    split_at: Option<usize>,
}

/// An in-memory container whose partitions serve pre-built pages.
///
/// Continuation tokens have the form `{pkrange_id}#{page_index}`. A partition that receives a token minted by another
/// partition (its parent, right after a split) starts from its first page.
pub struct MockContainer {
    partitions: Mutex<HashMap<String, MockPartition>>,
    children: Mutex<HashMap<String, Vec<PartitionKeyRange>>>,
    throttles: Mutex<HashMap<(String, usize), usize>>,
    failures: Mutex<HashSet<(String, usize)>>,
    recorder: RequestRecorder,
}

impl MockContainer {
    pub fn new(recorder: RequestRecorder) -> Arc<Self> {
        Arc::new(Self {
            partitions: Mutex::new(HashMap::new()),
            children: Mutex::new(HashMap::new()),
            throttles: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashSet::new()),
            recorder,
        })
    }

    pub fn context(self: &Arc<Self>) -> ProducerContext<MockItem> {
        ProducerContext::new(self.clone(), self.clone())
    }

    pub fn add_partition(&self, pkrange_id: &str, pages: Vec<Vec<MockItem>>) {
        self.partitions.lock().unwrap().insert(
            pkrange_id.to_string(),
            MockPartition {
                pages,
                split_at: None,
            },
        );
    }

    /// Makes `pkrange_id` report a split once it has served `after_pages` pages.
    pub fn split(&self, pkrange_id: &str, after_pages: usize, children: Vec<PartitionKeyRange>) {
        if let Some(partition) = self.partitions.lock().unwrap().get_mut(pkrange_id) {
            partition.split_at = Some(after_pages);
        }
        self.children
            .lock()
            .unwrap()
            .insert(pkrange_id.to_string(), children);
    }

    /// Throttles the next `count` requests for page `page_index` of `pkrange_id`.
    pub fn throttle(&self, pkrange_id: &str, page_index: usize, count: usize) {
        self.throttles
            .lock()
            .unwrap()
            .insert((pkrange_id.to_string(), page_index), count);
    }

    /// Fails every request for page `page_index` of `pkrange_id` with a non-retriable failure.
    pub fn fail(&self, pkrange_id: &str, page_index: usize) {
        self.failures
            .lock()
            .unwrap()
            .insert((pkrange_id.to_string(), page_index));
    }

    fn page_index(pkrange_id: &str, continuation: Option<&str>) -> usize {
        continuation
            .and_then(|c| c.split_once('#'))
            .filter(|(owner, _)| *owner == pkrange_id)
            .and_then(|(_, index)| index.parse().ok())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RequestIssuer<MockItem> for MockContainer {
    async fn fetch(
        &self,
        range: &PartitionKeyRange,
        continuation: Option<&str>,
        max_item_count: usize,
    ) -> Result<ResultPage<MockItem>, FetchFailure> {
        let id = range.id().value().to_string();
        self.recorder.record(RecordedRequest {
            pkrange_id: id.clone(),
            continuation: continuation.map(str::to_string),
            max_item_count,
        });

        let index = Self::page_index(&id, continuation);
        if let Some(remaining) = self.throttles.lock().unwrap().get_mut(&(id.clone(), index)) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(FetchFailure::throttled(None));
            }
        }

        if self.failures.lock().unwrap().contains(&(id.clone(), index)) {
            return Err(FetchFailure::other(format!("page {index} of {id} is unavailable")));
        }

        let partitions = self.partitions.lock().unwrap();
        let partition = partitions
            .get(&id)
            .ok_or_else(|| FetchFailure::other(format!("unknown partition {id}")))?;

        match partition.split_at {
            Some(split_at) if index >= split_at => {
                return Err(FetchFailure::split(format!("partition {id} is gone")));
            }
            Some(_) => {
                // A partition about to split always reports more results.
                let items = partition.pages.get(index).cloned().unwrap_or_default();
                return Ok(ResultPage::new(items, Some(format!("{id}#{}", index + 1))));
            }
            None => {}
        }

        let items = partition.pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < partition.pages.len()).then(|| format!("{id}#{}", index + 1));
        Ok(ResultPage::new(items, next))
    }
}

#[async_trait]
impl PartitionResolver for MockContainer {
    async fn resolve_children(
        &self,
        pkrange_id: &PartitionKeyRangeId,
    ) -> Result<Vec<PartitionKeyRange>, FetchFailure> {
        self.children
            .lock()
            .unwrap()
            .get(pkrange_id.value())
            .cloned()
            .ok_or_else(|| FetchFailure::other(format!("partition {pkrange_id} was not split")))
    }
}
