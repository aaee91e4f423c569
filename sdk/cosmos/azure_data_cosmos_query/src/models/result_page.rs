// Copyright (c) Microsoft Corporation. All rights reserved.
// Licensed under the MIT License.

/// A single page of query results.
///
/// Returned by a [`RequestIssuer`](crate::producer::RequestIssuer) for one partition, and by the producers for the whole query.
/// A `continuation` of `None` means no more pages follow from the same source.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultPage<T> {
    /// The items in this page, in the order the source returned them.
    pub items: Vec<T>,

    /// The token to pass back to resume after this page, if more pages follow.
    pub continuation: Option<String>,
}

impl<T> ResultPage<T> {
    pub fn new(items: Vec<T>, continuation: Option<String>) -> Self {
        Self {
            items,
            continuation,
        }
    }

    /// Indicates if no pages follow this one.
    pub fn is_last(&self) -> bool {
        self.continuation.is_none()
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }
}
