//! Grouped concurrent execution of per-item work.

use std::future::Future;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Runs `worker` over `items` in contiguous groups of `batch_size`.
///
/// Members of one group run concurrently; groups run one after another.
/// Returns how many invocations resolved to `true`. A worker that panics
/// counts as `false` and does not disturb its siblings. A non-positive
/// `batch_size` puts every item in a single group.
pub async fn run_batched<T, F, Fut>(items: Vec<T>, batch_size: i64, worker: F) -> usize
where
    T: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = bool> + Send + 'static,
{
    if items.is_empty() {
        return 0;
    }

    let total = items.len();
    let group_size = if batch_size <= 0 {
        total
    } else {
        batch_size as usize
    };
    let groups = total.div_ceil(group_size);

    let mut succeeded = 0;
    let mut items = items.into_iter().peekable();
    let mut group = 0;

    while items.peek().is_some() {
        group += 1;
        let mut set = JoinSet::new();
        for item in items.by_ref().take(group_size) {
            set.spawn(worker(item));
        }
        debug!(group, groups, size = set.len(), "Processing batch");

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(true) => succeeded += 1,
                Ok(false) => {}
                Err(e) => warn!(group, "Batch member failed: {}", e),
            }
        }
    }

    succeeded
}
