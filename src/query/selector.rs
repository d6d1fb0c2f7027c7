//! Series selection and sharding
//!
//! A [`SeriesSelector`] resolves a set of label matchers against storage
//! once per query and lends the resolved series, sliced into contiguous
//! shards, to the leaf operators of every shard's operator tree.
//!
//! # Resolution
//!
//! ```text
//! shard 0 ─┐
//! shard 1 ─┼─ series(ctx, shard, n) ──▶ lock ─┬─ Loaded  ──▶ slice
//! shard 2 ─┘                                  ├─ Failed  ──▶ replay error
//!                                             └─ Pending ──▶ querier → select → close
//! ```
//!
//! The first caller performs the storage query while holding the state lock;
//! concurrent callers block on the lock and then observe the same outcome.
//! A failed resolution is cached and its error replayed to every later
//! caller; it is never retried. Cancellation observed before the storage
//! query starts is not cached.

use crate::metrics;
use crate::query::error::QueryError;
use crate::query::executor::ExecutionContext;
use crate::storage::{MemoizedIterator, Querier, Queryable};
use crate::types::{LabelMatcher, Labels, TimeRange};
use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, Range};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Default look-back memo window of each series iterator (5 minutes)
pub const DEFAULT_MEMO_WINDOW_MS: i64 = 5 * 60 * 1000;

/// One resolved series
///
/// Created once during resolution and never replaced. The point iterator is
/// behind a mutex so the descriptor can be lent to shard workers; shards are
/// disjoint, so each iterator is driven by a single worker.
pub struct VectorScan {
    labels: Labels,
    signature: u64,
    samples: Mutex<MemoizedIterator>,
}

impl VectorScan {
    /// Label set of the series
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Position of the series in storage order, starting at zero
    pub fn signature(&self) -> u64 {
        self.signature
    }

    /// Lock the memoized point iterator
    pub fn samples(&self) -> MutexGuard<'_, MemoizedIterator> {
        self.samples.lock()
    }
}

impl std::fmt::Debug for VectorScan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorScan")
            .field("labels", &self.labels)
            .field("signature", &self.signature)
            .finish()
    }
}

/// A contiguous slice of the resolved series list
///
/// Dereferences to `[VectorScan]`. Cheap to clone.
#[derive(Clone)]
pub struct ShardView {
    scans: Arc<Vec<VectorScan>>,
    range: Range<usize>,
}

impl ShardView {
    /// Index bounds of this shard within the full series list
    pub fn bounds(&self) -> Range<usize> {
        self.range.clone()
    }

    /// Number of series in the full (unsharded) list
    pub fn total(&self) -> usize {
        self.scans.len()
    }
}

impl Deref for ShardView {
    type Target = [VectorScan];

    fn deref(&self) -> &[VectorScan] {
        &self.scans[self.range.clone()]
    }
}

impl std::fmt::Debug for ShardView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardView")
            .field("range", &self.range)
            .field("total", &self.scans.len())
            .finish()
    }
}

/// Bounds of shard `shard` out of `num_shards` over `len` series
///
/// `[shard * len / num_shards, (shard + 1) * len / num_shards)`, clamped to
/// `len`. Requires `num_shards > 0`.
pub fn shard_bounds(shard: usize, num_shards: usize, len: usize) -> Range<usize> {
    let start = (shard * len / num_shards).min(len);
    let end = ((shard + 1) * len / num_shards).min(len);
    start..end.max(start)
}

enum LoadState {
    Pending,
    Loaded(Arc<Vec<VectorScan>>),
    Failed(QueryError),
}

/// Resolves matchers against storage exactly once and shards the result
pub struct SeriesSelector {
    storage: Arc<dyn Queryable>,
    range: TimeRange,
    matchers: Vec<LabelMatcher>,
    memo_window_ms: i64,
    state: Mutex<LoadState>,
}

impl SeriesSelector {
    /// Create a selector over `range`; no storage access happens until first use
    pub fn new(storage: Arc<dyn Queryable>, range: TimeRange, matchers: Vec<LabelMatcher>) -> Self {
        Self {
            storage,
            range,
            matchers,
            memo_window_ms: DEFAULT_MEMO_WINDOW_MS,
            state: Mutex::new(LoadState::Pending),
        }
    }

    /// Override the memo window of the per-series iterators
    pub fn with_memo_window(mut self, memo_window_ms: i64) -> Self {
        self.memo_window_ms = memo_window_ms;
        self
    }

    /// Time window handed to storage
    pub fn range(&self) -> TimeRange {
        self.range
    }

    /// Label matchers of this selector
    pub fn matchers(&self) -> &[LabelMatcher] {
        &self.matchers
    }

    /// Resolve (first call only) and return shard `shard` of `num_shards`
    ///
    /// The same `(shard, num_shards)` pair always yields the same slice, and
    /// the slices of all shards cover the series list without overlap.
    pub fn series(
        &self,
        ctx: &ExecutionContext,
        shard: usize,
        num_shards: usize,
    ) -> Result<ShardView, QueryError> {
        if num_shards == 0 || shard >= num_shards {
            return Err(QueryError::construction(format!(
                "invalid shard {} of {}",
                shard, num_shards
            )));
        }

        let scans = self.load(ctx)?;
        let range = shard_bounds(shard, num_shards, scans.len());
        Ok(ShardView { scans, range })
    }

    /// Whether the one-time resolution has completed (successfully or not)
    pub fn is_resolved(&self) -> bool {
        !matches!(*self.state.lock(), LoadState::Pending)
    }

    fn load(&self, ctx: &ExecutionContext) -> Result<Arc<Vec<VectorScan>>, QueryError> {
        let mut state = self.state.lock();
        match &*state {
            LoadState::Loaded(scans) => return Ok(scans.clone()),
            LoadState::Failed(err) => {
                warn!(error = %err, "Replaying failed series resolution");
                return Err(err.clone());
            }
            LoadState::Pending => {}
        }

        ctx.check()?;

        let start = Instant::now();
        let result = self.resolve();
        let elapsed = start.elapsed();

        match result {
            Ok(scans) => {
                debug!(
                    matchers = self.matchers.len(),
                    series = scans.len(),
                    range = %self.range,
                    elapsed_us = elapsed.as_micros() as u64,
                    "Resolved series"
                );
                metrics::record_resolution(elapsed.as_secs_f64(), scans.len(), true);
                let scans = Arc::new(scans);
                *state = LoadState::Loaded(scans.clone());
                Ok(scans)
            }
            Err(err) => {
                warn!(error = %err, range = %self.range, "Series resolution failed");
                metrics::record_resolution(elapsed.as_secs_f64(), 0, false);
                *state = LoadState::Failed(err.clone());
                Err(err)
            }
        }
    }

    fn resolve(&self) -> Result<Vec<VectorScan>, QueryError> {
        let mut querier = self.storage.querier(self.range)?;
        let scanned = self.scan(querier.as_mut());

        // Released on every path; a select error takes precedence over a close error
        let closed = querier.close();
        let scans = scanned?;
        closed?;
        Ok(scans)
    }

    fn scan(&self, querier: &mut dyn Querier) -> Result<Vec<VectorScan>, QueryError> {
        let mut set = querier.select(&self.matchers)?;
        let mut scans = Vec::new();
        while let Some(series) = set.next()? {
            scans.push(VectorScan {
                labels: series.labels,
                signature: scans.len() as u64,
                samples: Mutex::new(MemoizedIterator::new(series.iterator, self.memo_window_ms)),
            });
        }
        Ok(scans)
    }
}

impl std::fmt::Debug for SeriesSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesSelector")
            .field("range", &self.range)
            .field("matchers", &self.matchers)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
