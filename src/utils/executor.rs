//! Stage barrier for concurrent per-item work
//!
//! A sync stage fans its items out onto tokio tasks and only returns once
//! every task has finished, so the next stage always starts from a settled
//! view of disk and quota state.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Run `work` for every item with at most `max_concurrent` tasks in flight,
/// waiting for all of them before returning.
///
/// Items are started in the order given. Outputs are collected in
/// completion order; a panicked task is logged and contributes no output.
pub async fn run_stage<T, F, Fut>(
    stage: &str,
    items: Vec<T>,
    max_concurrent: usize,
    work: F,
) -> Vec<Fut::Output>
where
    T: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
{
    let limit = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let mut tasks = JoinSet::new();
    let total = items.len();

    for item in items {
        // Acquiring before spawning keeps start order equal to item order
        let permit = match limit.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let fut = work(item);
        tasks.spawn(async move {
            let output = fut.await;
            drop(permit);
            output
        });
    }

    let mut outputs = Vec::with_capacity(total);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(output) => outputs.push(output),
            Err(e) => tracing::error!("{} task failed: {}", stage, e),
        }
    }

    tracing::debug!("Stage {} finished {}/{} items", stage, outputs.len(), total);
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_stage_waits_for_all_items() {
        let done = Arc::new(AtomicUsize::new(0));
        let outputs = run_stage("test", vec![3u64, 1, 2], 4, |ms| {
            let done = done.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                done.fetch_add(1, Ordering::SeqCst);
                ms
            }
        })
        .await;

        assert_eq!(done.load(Ordering::SeqCst), 3);
        let mut sorted = outputs.clone();
        sorted.sort();
        assert_eq!(sorted, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_single_permit_runs_in_item_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        run_stage("ordered", vec![5, 1, 3], 1, |n| {
            let order = order.clone();
            async move {
                order.lock().push(n);
            }
        })
        .await;

        assert_eq!(*order.lock(), vec![5, 1, 3]);
    }
}
