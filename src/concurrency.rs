/// Bounded Concurrent Fan-out
///
/// Runs an async processor over a list of items with at most `limit`
/// invocations in flight. As soon as one finishes the next item is started
/// (sliding window, not fixed chunks), so a slow item never idles the rest
/// of the window.
///
/// Results come back in input order so callers can zip them with the
/// items they were produced from.
///
/// The processor is expected to absorb its own failures (return a sentinel
/// or a `Result`); one failing item never cancels the others.

use futures::stream::{self, StreamExt};
use std::future::Future;

#[derive(Debug, Clone, Copy)]
pub struct ConcurrencyLimiter {
    limit: usize,
}

impl ConcurrencyLimiter {
    /// A limit of zero is treated as one
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Process every item, keeping at most `limit` futures in flight.
    pub async fn run<I, T, F, Fut>(&self, items: I, processor: F) -> Vec<T>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Fut,
        Fut: Future<Output = T>,
    {
        let mut processor = processor;

        let mut indexed: Vec<(usize, T)> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| {
                let fut = processor(item);
                async move { (index, fut.await) }
            })
            .buffer_unordered(self.limit)
            .collect()
            .await;

        // buffer_unordered yields in completion order
        indexed.sort_unstable_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }
}
