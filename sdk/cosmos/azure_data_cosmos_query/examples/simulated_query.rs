// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

//! Runs a cross-partition query against an in-memory container.
//!
//! ```bash
//! RUST_LOG=azure_data_cosmos_query=debug cargo run --example simulated_query -- --ordered --split --throttle-every 5
//! ```

use std::{
    collections::HashMap,
    error::Error,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use azure_data_cosmos_query::{
    models::{
        ItemComparator, OrderByComparator, OrderByRow, PartitionKeyRange, PartitionKeyRangeId,
        ResultPage, SortKey, SortOrder,
    },
    producer::{PartitionResolver, ProducerContext, QueryProducer, RequestIssuer},
    FetchFailure, QueryProducerOptions,
};
use clap::Parser;
use futures::TryStreamExt;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

type Row = OrderByRow<Value>;

/// Run a simulated cross-partition query.
#[derive(Parser)]
struct Args {
    /// The number of partition key ranges in the container.
    #[arg(long, default_value_t = 3)]
    partitions: usize,

    /// The number of pages each partition returns.
    #[arg(long, default_value_t = 4)]
    pages: usize,

    /// The page size requested from each partition.
    #[arg(long, default_value_t = 5)]
    max_item_count: usize,

    /// The maximum number of partitions queried at the same time.
    #[arg(long)]
    max_concurrency: Option<usize>,

    /// Merge the partitions in `ORDER BY` order instead of interleaving their pages.
    #[arg(long)]
    ordered: bool,

    /// Split the first partition after it returned its first page.
    #[arg(long)]
    split: bool,

    /// Throttle every n-th request.
    #[arg(long)]
    throttle_every: Option<usize>,

    /// Stop after this many pages, then resume the query from the last continuation token.
    #[arg(long)]
    resume_after: Option<usize>,
}

struct SimulatedPartition {
    rows: Vec<Row>,
    split_after: Option<usize>,
}

/// A container whose partitions serve generated rows. Continuation tokens have the form `{pkrange_id}#{offset}`.
struct SimulatedContainer {
    partitions: HashMap<String, SimulatedPartition>,
    children: HashMap<String, Vec<PartitionKeyRange>>,
    throttle_every: Option<usize>,
    requests: AtomicUsize,
}

fn boundary(index: usize, count: usize) -> String {
    match index {
        0 => String::new(),
        i if i == count => "FF".to_string(),
        i => format!("{:02X}", i * 255 / count),
    }
}

fn rows(pkrange_id: &str, count: usize, first_key: usize, stride: usize) -> Vec<Row> {
    (0..count)
        .map(|n| {
            let key = first_key + n * stride;
            OrderByRow {
                order_by_items: vec![SortKey::new(key)],
                payload: json!({ "id": format!("{pkrange_id}-{n}"), "pkrangeId": pkrange_id, "key": key }),
            }
        })
        .collect()
}

impl SimulatedContainer {
    fn new(args: &Args) -> (Self, Vec<PartitionKeyRange>) {
        let count = args.partitions.max(1);
        let per_partition = args.pages * args.max_item_count;
        let mut partitions = HashMap::new();
        let mut children = HashMap::new();
        let mut ranges = Vec::new();

        for i in 0..count {
            let id = i.to_string();
            let range = PartitionKeyRange::new(id.as_str(), boundary(i, count), boundary(i + 1, count));
            let mut partition = SimulatedPartition {
                rows: rows(&id, per_partition, i, count),
                split_after: None,
            };

            if args.split && i == 0 {
                // The children hold the rows the parent did not return before the split.
                partition.split_after = Some(args.max_item_count);
                let middle = format!("{:02X}", 255 / count / 2);
                let remaining = per_partition.saturating_sub(args.max_item_count);
                let first_key = args.max_item_count * count;
                for (child, min, max) in [
                    ("split-a", range.min_inclusive().to_string(), middle.clone()),
                    ("split-b", middle, range.max_exclusive().to_string()),
                ] {
                    partitions.insert(
                        child.to_string(),
                        SimulatedPartition {
                            rows: rows(child, remaining / 2, first_key, count * 2),
                            split_after: None,
                        },
                    );
                    children
                        .entry(id.clone())
                        .or_insert_with(Vec::new)
                        .push(PartitionKeyRange::new(child, min, max));
                }
            }

            partitions.insert(id, partition);
            ranges.push(range);
        }

        let container = Self {
            partitions,
            children,
            throttle_every: args.throttle_every,
            requests: AtomicUsize::new(0),
        };
        (container, ranges)
    }
}

#[async_trait]
impl RequestIssuer<Row> for SimulatedContainer {
    async fn fetch(
        &self,
        range: &PartitionKeyRange,
        continuation: Option<&str>,
        max_item_count: usize,
    ) -> Result<ResultPage<Row>, FetchFailure> {
        let request = self.requests.fetch_add(1, Ordering::Relaxed) + 1;
        if matches!(self.throttle_every, Some(n) if n > 0 && request % n == 0) {
            return Err(FetchFailure::throttled(Some(Duration::from_millis(20))));
        }

        let id = range.id().value();
        let partition = self
            .partitions
            .get(id)
            .ok_or_else(|| FetchFailure::other(format!("unknown partition {id}")))?;
        let offset = continuation
            .and_then(|c| c.split_once('#'))
            .filter(|(owner, _)| *owner == id)
            .and_then(|(_, offset)| offset.parse::<usize>().ok())
            .unwrap_or(0);

        if matches!(partition.split_after, Some(n) if offset >= n) {
            return Err(FetchFailure::split(format!("partition {id} is gone")));
        }

        let end = (offset + max_item_count).min(partition.rows.len());
        let items = partition.rows[offset.min(end)..end].to_vec();
        let next = (end < partition.rows.len() || partition.split_after.is_some())
            .then(|| format!("{id}#{end}"));
        Ok(ResultPage::new(items, next))
    }
}

#[async_trait]
impl PartitionResolver for SimulatedContainer {
    async fn resolve_children(
        &self,
        pkrange_id: &PartitionKeyRangeId,
    ) -> Result<Vec<PartitionKeyRange>, FetchFailure> {
        self.children
            .get(pkrange_id.value())
            .cloned()
            .ok_or_else(|| FetchFailure::other(format!("partition {pkrange_id} was not split")))
    }
}

async fn run(
    producer: QueryProducer<Row>,
    limit: Option<usize>,
) -> Result<Option<String>, Box<dyn Error>> {
    let mut pages = Box::pin(producer.into_stream());
    let mut count = 0;
    let mut continuation = None;
    while let Some(page) = pages.try_next().await? {
        count += 1;
        println!("Results Page {count}");
        println!("  Items:");
        for row in &page.items {
            println!("    * {}", row.payload);
        }
        continuation = page.continuation;
        if limit.is_some_and(|limit| count >= limit) {
            break;
        }
    }
    Ok(continuation)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let (container, ranges) = SimulatedContainer::new(&args);
    let container = Arc::new(container);
    let context: ProducerContext<Row> = ProducerContext::new(container.clone(), container);

    let mut options = QueryProducerOptions::builder().with_max_item_count(args.max_item_count);
    if let Some(max_concurrency) = args.max_concurrency {
        options = options.with_max_concurrency(max_concurrency);
    }
    let options = options.build();

    let order_by = || {
        args.ordered.then(|| -> Arc<dyn ItemComparator<Row>> {
            Arc::new(OrderByComparator::new(vec![SortOrder::Ascending]))
        })
    };

    let producer = QueryProducer::new(ranges, order_by(), context.clone(), options.clone(), None)?;
    let continuation = run(producer, args.resume_after).await?;

    if let (Some(_), Some(continuation)) = (args.resume_after, continuation) {
        println!("Resuming from {continuation}");
        let producer = QueryProducer::new(
            Vec::new(),
            order_by(),
            context,
            options,
            Some(&continuation),
        )?;
        run(producer, None).await?;
    }

    Ok(())
}
