//! Worker pool — bounded-concurrency, order-preserving block processing.
//!
//! `run_batch` parallelizes exactly one caller-sized batch via
//! `rayon::par_iter`, preserving order. It touches only the items handed to
//! it, so a driving loop that reads one batch at a time, runs it, and sinks
//! the results before reading the next keeps at most `2 * workers` blocks
//! resident — the packer's staged two-pass pipeline drives it this way.
//! `run_batched` is a convenience on top for callers whose whole item list
//! and result list already fit comfortably in memory (e.g. opening the
//! blocks of a container already read into memory).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use crate::error::EngineError;

/// Shared cancellation flag. Checked between batches; a cancelled run
/// returns `EngineError::Cancelled` instead of partial output.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs `f` over one batch in parallel via rayon, preserving order. `base_index`
/// is the index of `batch[0]` in the caller's overall sequence, so `f` sees
/// the same indices it would if the whole sequence were processed at once.
pub fn run_batch<T, U, F>(
    batch: Vec<T>,
    token: &CancellationToken,
    base_index: usize,
    f: F,
) -> Result<Vec<U>, EngineError>
where
    T: Send,
    U: Send,
    F: Fn(usize, T) -> Result<U, EngineError> + Sync,
{
    if token.is_cancelled() {
        return Err(EngineError::Cancelled);
    }
    batch
        .into_par_iter()
        .enumerate()
        .map(|(offset, item)| f(base_index + offset, item))
        .collect()
}

/// Runs `f` over every item in `items`, `workers`-wide at a time in batches
/// of `2 * workers`, preserving input order in the returned `Vec`. Suited to
/// workloads whose whole input and output already fit comfortably in
/// memory. A pipeline that must bound residency across the whole run should
/// drive [`run_batch`] directly, one batch at a time, sinking each batch's
/// results before requesting the next.
pub fn run_batched<T, U, F>(
    items: Vec<T>,
    workers: usize,
    token: &CancellationToken,
    f: F,
) -> Result<Vec<U>, EngineError>
where
    T: Send,
    U: Send,
    F: Fn(usize, T) -> Result<U, EngineError> + Sync,
{
    let workers = workers.max(1);
    let batch_size = 2 * workers;
    let mut results: Vec<U> = Vec::with_capacity(items.len());
    let mut remaining = items;
    let mut base_index = 0usize;

    while !remaining.is_empty() {
        let tail = remaining.split_off(batch_size.min(remaining.len()));
        let batch = std::mem::replace(&mut remaining, tail);
        let mut batch_results = run_batch(batch, token, base_index, &f)?;
        base_index += batch_results.len();
        results.append(&mut batch_results);
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_order() {
        let items: Vec<u32> = (0..50).collect();
        let token = CancellationToken::new();
        let out = run_batched(items.clone(), 4, &token, |_i, x| Ok(x * 2)).unwrap();
        let expected: Vec<u32> = items.iter().map(|x| x * 2).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn index_matches_position() {
        let items: Vec<u32> = (100..120).collect();
        let token = CancellationToken::new();
        let out = run_batched(items, 3, &token, |i, x| Ok((i as u32, x))).unwrap();
        for (i, (reported_i, _)) in out.iter().enumerate() {
            assert_eq!(*reported_i, i as u32);
        }
    }

    #[test]
    fn cancellation_short_circuits() {
        let items: Vec<u32> = (0..10).collect();
        let token = CancellationToken::new();
        token.cancel();
        let err = run_batched(items, 2, &token, |_i, x| Ok(x)).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[test]
    fn propagates_first_error() {
        let items: Vec<u32> = (0..10).collect();
        let token = CancellationToken::new();
        let err = run_batched(items, 2, &token, |_i, x| {
            if x == 5 {
                Err(EngineError::Usage("boom".into()))
            } else {
                Ok(x)
            }
        })
        .unwrap_err();
        assert!(matches!(err, EngineError::Usage(_)));
    }

    #[test]
    fn run_batch_honors_base_index_and_cancellation() {
        let token = CancellationToken::new();
        let out = run_batch(vec![10u32, 20, 30], &token, 5, |i, x| Ok((i, x))).unwrap();
        assert_eq!(out, vec![(5, 10), (6, 20), (7, 30)]);

        token.cancel();
        let err = run_batch(vec![1u32], &token, 0, |_i, x| Ok(x)).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }
}
