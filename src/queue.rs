//! Bounded batch runner for lists of fallible async operations.
//!
//! Operations are drained in sequential batches of at most `limit`
//! concurrently pending futures. A batch is awaited until every member has
//! settled (no fail-fast). Successes of a clean batch are kept; a batch with
//! at least one failure is recorded wholesale in [`BatchResult::err_stack`]
//! and its successes are dropped. Nothing is retried and the next batch
//! always runs.
//!
//! Rust futures are lazy, so unlike eagerly started promises the limit really
//! bounds how many requests are in flight at once.

use futures::future::join_all;
use itertools::{Either, Itertools};
use std::future::Future;
use tracing::{debug, warn};

/// A batch that contained at least one failure.
#[derive(Debug)]
pub struct FailedBatch<E> {
    /// Zero-based position of the batch in the run.
    pub index: usize,
    /// Every error raised inside the batch, in submission order.
    pub errors: Vec<E>,
    /// Number of successful siblings that were discarded with the batch.
    pub dropped: usize,
}

/// Outcome of one [`run_batched`] invocation.
#[derive(Debug)]
pub struct BatchResult<T, E> {
    /// Successes of every clean batch, in batch order and submission order
    /// within a batch.
    pub ret: Vec<T>,
    /// One entry per batch that had a failure.
    pub err_stack: Vec<FailedBatch<E>>,
}

impl<T, E> BatchResult<T, E> {
    pub fn failed_operations(&self) -> usize {
        self.err_stack
            .iter()
            .map(|batch| batch.errors.len() + batch.dropped)
            .sum()
    }
}

/// Run `ops` in batches of at most `limit` (`None` or `0` means one batch).
pub async fn run_batched<I, F, T, E>(ops: I, limit: Option<usize>) -> BatchResult<T, E>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut pending: Vec<F> = ops.into_iter().collect();
    let limit = match limit {
        Some(l) if l > 0 => l,
        _ => pending.len().max(1),
    };

    let mut ret = Vec::new();
    let mut err_stack = Vec::new();
    let mut index = 0usize;

    while !pending.is_empty() {
        let take = limit.min(pending.len());
        let batch: Vec<F> = pending.drain(..take).collect();
        let settled = join_all(batch).await;

        let (oks, errors): (Vec<T>, Vec<E>) = settled.into_iter().partition_map(|r| match r {
            Ok(v) => Either::Left(v),
            Err(e) => Either::Right(e),
        });

        if errors.is_empty() {
            debug!(batch = index, size = oks.len(), "Batch settled");
            ret.extend(oks);
        } else {
            warn!(
                batch = index,
                failed = errors.len(),
                dropped = oks.len(),
                first_error = %errors[0],
                "Batch had failures; discarding it"
            );
            err_stack.push(FailedBatch {
                index,
                errors,
                dropped: oks.len(),
            });
        }
        index += 1;
    }

    BatchResult { ret, err_stack }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn ok(v: u32) -> impl Future<Output = Result<u32, String>> {
        async move { Ok(v) }
    }

    #[tokio::test]
    async fn test_empty_input() {
        let ops: Vec<std::future::Ready<Result<u32, String>>> = Vec::new();
        let res = run_batched(ops, Some(3)).await;
        assert!(res.ret.is_empty());
        assert!(res.err_stack.is_empty());
    }

    #[tokio::test]
    async fn test_limit_above_length_is_single_batch() {
        let failing = vec![
            futures::future::Either::Left(ok(1)),
            futures::future::Either::Right(async { Err::<u32, String>("boom".to_string()) }),
            futures::future::Either::Left(ok(3)),
        ];
        let res = run_batched(failing, Some(50)).await;
        assert!(res.ret.is_empty());
        assert_eq!(res.err_stack.len(), 1);
        assert_eq!(res.err_stack[0].index, 0);
        assert_eq!(res.err_stack[0].dropped, 2);

        let clean: Vec<_> = (1..=4).map(ok).collect();
        let res = run_batched(clean, None).await;
        assert_eq!(res.ret, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_failure_drops_only_its_own_batch() {
        let ops: Vec<_> = (0..6u32)
            .map(|i| async move {
                if i == 3 {
                    Err(format!("item {i} failed"))
                } else {
                    Ok(i)
                }
            })
            .collect();

        let res = run_batched(ops, Some(2)).await;
        // batches: [0,1] [2,3] [4,5]
        assert_eq!(res.ret, vec![0, 1, 4, 5]);
        assert_eq!(res.err_stack.len(), 1);
        assert_eq!(res.err_stack[0].index, 1);
        assert_eq!(res.err_stack[0].errors, vec!["item 3 failed".to_string()]);
        assert_eq!(res.err_stack[0].dropped, 1);
        assert_eq!(res.failed_operations(), 2);
    }

    #[tokio::test]
    async fn test_results_keep_submission_order_within_batch() {
        let ops: Vec<_> = [30u64, 10, 20]
            .into_iter()
            .map(|ms| async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok::<u64, String>(ms)
            })
            .collect();
        let res = run_batched(ops, None).await;
        assert_eq!(res.ret, vec![30, 10, 20]);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let ops: Vec<_> = (0..7u32)
            .map(|i| {
                let in_flight = Arc::clone(&in_flight);
                let peak = Arc::clone(&peak);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok::<u32, String>(i)
                }
            })
            .collect();

        let res = run_batched(ops, Some(3)).await;
        assert_eq!(res.ret.len(), 7);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
