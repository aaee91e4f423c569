// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! A scripted backend used by the unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use crate::{
    models::{PartitionKeyRange, PartitionKeyRangeId, ResultPage},
    producer::{PartitionResolver, ProducerContext, RequestIssuer},
    FetchFailure,
};

type Response = Result<ResultPage<String>, FetchFailure>;

/// Builds a page of string items.
pub(crate) fn page(items: &[&str], continuation: Option<&str>) -> ResultPage<String> {
    ResultPage::new(
        items.iter().map(|s| s.to_string()).collect(),
        continuation.map(str::to_string),
    )
}

/// Replays scripted responses per partition, in order, and records every request.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    responses: Mutex<HashMap<String, VecDeque<Response>>>,
    children: Mutex<HashMap<String, Vec<PartitionKeyRange>>>,
    requests: Mutex<Vec<(String, Option<String>, usize)>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn context(self: &Arc<Self>) -> ProducerContext<String> {
        ProducerContext::new(self.clone(), self.clone())
    }

    pub fn script(&self, pkrange_id: &str, page: ResultPage<String>) {
        self.push(pkrange_id, Ok(page));
    }

    pub fn script_failure(&self, pkrange_id: &str, failure: FetchFailure) {
        self.push(pkrange_id, Err(failure));
    }

    pub fn children(&self, pkrange_id: &str, children: Vec<PartitionKeyRange>) {
        self.children
            .lock()
            .unwrap()
            .insert(pkrange_id.to_string(), children);
    }

    /// The recorded `(pkrange_id, continuation, max_item_count)` of every request, in order.
    pub fn requests(&self) -> Vec<(String, Option<String>, usize)> {
        self.requests.lock().unwrap().clone()
    }

    fn push(&self, pkrange_id: &str, response: Response) {
        self.responses
            .lock()
            .unwrap()
            .entry(pkrange_id.to_string())
            .or_default()
            .push_back(response);
    }
}

#[async_trait]
impl RequestIssuer<String> for ScriptedBackend {
    async fn fetch(
        &self,
        range: &PartitionKeyRange,
        continuation: Option<&str>,
        max_item_count: usize,
    ) -> Response {
        let id = range.id().value().to_string();
        self.requests.lock().unwrap().push((
            id.clone(),
            continuation.map(str::to_string),
            max_item_count,
        ));
        self.responses
            .lock()
            .unwrap()
            .get_mut(&id)
            .and_then(|queue| queue.pop_front())
            .unwrap_or_else(|| Err(FetchFailure::other(format!("nothing scripted for {id}"))))
    }
}

#[async_trait]
impl PartitionResolver for ScriptedBackend {
    async fn resolve_children(
        &self,
        pkrange_id: &PartitionKeyRangeId,
    ) -> Result<Vec<PartitionKeyRange>, FetchFailure> {
        self.children
            .lock()
            .unwrap()
            .get(pkrange_id.value())
            .cloned()
            .ok_or_else(|| FetchFailure::other(format!("no children for {pkrange_id}")))
    }
}
