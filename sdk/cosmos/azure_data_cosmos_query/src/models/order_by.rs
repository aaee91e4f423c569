// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Compares two result items according to the query's declared sort order.
///
/// Implemented for any `Fn(&T, &T) -> Ordering`, so a closure can be used directly.
pub trait ItemComparator<T>: Send + Sync {
    fn compare(&self, left: &T, right: &T) -> Ordering;
}

impl<T, F> ItemComparator<T> for F
where
    F: Fn(&T, &T) -> Ordering + Send + Sync,
{
    fn compare(&self, left: &T, right: &T) -> Ordering {
        self(left, right)
    }
}

/// The direction of a single `ORDER BY` expression.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    /// Applies this sort direction to an ascending comparison result.
    pub fn apply(self, ordering: Ordering) -> Ordering {
        match self {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    }
}

/// A single `ORDER BY` value, with a total order across JSON types.
///
/// Values of different types order as `null < boolean < number < string < array < object`.
/// Numbers compare numerically, strings compare ordinally.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(transparent)]
pub struct SortKey(Value);

impl SortKey {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    pub fn value(&self) -> &Value {
        &self.0
    }
}

impl From<Value> for SortKey {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_numbers(left: &serde_json::Number, right: &serde_json::Number) -> Ordering {
    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
        return l.cmp(&r);
    }
    if let (Some(l), Some(r)) = (left.as_u64(), right.as_u64()) {
        return l.cmp(&r);
    }
    let l = left.as_f64().unwrap_or(f64::NAN);
    let r = right.as_f64().unwrap_or(f64::NAN);
    l.total_cmp(&r)
}

fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(l), Value::Bool(r)) => l.cmp(r),
        (Value::Number(l), Value::Number(r)) => compare_numbers(l, r),
        (Value::String(l), Value::String(r)) => l.cmp(r),
        (Value::Array(l), Value::Array(r)) => l
            .iter()
            .zip(r.iter())
            .map(|(l, r)| compare_values(l, r))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| l.len().cmp(&r.len())),
        (Value::Object(l), Value::Object(r)) => l
            .iter()
            .zip(r.iter())
            .map(|((lk, lv), (rk, rv))| lk.cmp(rk).then_with(|| compare_values(lv, rv)))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| l.len().cmp(&r.len())),
        _ => type_rank(left).cmp(&type_rank(right)),
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_values(&self.0, &other.0)
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SortKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for SortKey {}

/// A row returned by a partition for an `ORDER BY` query: the evaluated sort keys plus the projected payload.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderByRow<P> {
    pub order_by_items: Vec<SortKey>,
    pub payload: P,
}

/// Compares [`OrderByRow`]s key by key, honoring the direction of each `ORDER BY` expression.
#[derive(Clone, Debug, Default)]
pub struct OrderByComparator {
    orders: Vec<SortOrder>,
}

impl OrderByComparator {
    pub fn new(orders: Vec<SortOrder>) -> Self {
        Self { orders }
    }

    pub fn orders(&self) -> &[SortOrder] {
        &self.orders
    }
}

impl<P> ItemComparator<OrderByRow<P>> for OrderByComparator {
    fn compare(&self, left: &OrderByRow<P>, right: &OrderByRow<P>) -> Ordering {
        for (i, order) in self.orders.iter().enumerate() {
            // A missing key sorts before any present key.
            let ordering = match (left.order_by_items.get(i), right.order_by_items.get(i)) {
                (Some(l), Some(r)) => l.cmp(r),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            let ordering = order.apply(ordering);
            if ordering.is_ne() {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// The head of one partition's buffer during an ordered merge.
///
/// Items are ordered by the query comparator first. Ties are broken by the `min_inclusive` of the source
/// partition key range, ascending, so equal rows from different partitions always merge in the same order.
#[derive(Clone, Debug)]
pub struct OrderByItem<'a, T> {
    pub item: &'a T,
    pub source_min_inclusive: &'a str,
}

impl<T> OrderByItem<'_, T> {
    pub fn compare(&self, other: &Self, comparator: &dyn ItemComparator<T>) -> Ordering {
        comparator
            .compare(self.item, other.item)
            .then_with(|| self.source_min_inclusive.cmp(other.source_min_inclusive))
    }
}
