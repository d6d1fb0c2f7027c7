//! Memoized series iterator
//!
//! Wraps a forward-only [`SeriesIterator`] and keeps the most recently read
//! points in a look-back buffer. Evaluating consecutive steps re-reads the
//! overlap between neighbouring windows from the buffer instead of rescanning
//! the underlying cursor.
//!
//! The buffer keeps every point not older than the lower of:
//! - the start of the last requested window
//! - the end of the last requested window minus the memo window
//!
//! Requests are expected to move forward in time. A backward seek is served
//! from the buffer as long as it stays within the memo window.

use crate::error::StorageError;
use crate::storage::SeriesIterator;
use crate::types::Point;
use std::collections::VecDeque;

/// Look-back buffered cursor over one series
pub struct MemoizedIterator {
    /// Underlying cursor
    inner: Box<dyn SeriesIterator>,

    /// How far behind the newest requested timestamp points are retained (ms)
    memo_window: i64,

    /// Points read so far and not yet evicted, ascending by timestamp
    buffer: VecDeque<Point>,

    /// Whether the underlying cursor is drained
    exhausted: bool,
}

impl MemoizedIterator {
    /// Create a memoized iterator keeping `memo_window_ms` of history
    pub fn new(inner: Box<dyn SeriesIterator>, memo_window_ms: i64) -> Self {
        Self {
            inner,
            memo_window: memo_window_ms.max(0),
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Append the points with `mint <= t <= maxt` to `out`
    pub fn range_into(
        &mut self,
        mint: i64,
        maxt: i64,
        out: &mut Vec<Point>,
    ) -> Result<(), StorageError> {
        self.fill_until(maxt)?;

        let start = self.buffer.partition_point(|p| p.t < mint);
        let end = self.buffer.partition_point(|p| p.t <= maxt);
        if start < end {
            out.extend(self.buffer.range(start..end).copied());
        }

        self.evict_before(mint.min(maxt.saturating_sub(self.memo_window)));
        Ok(())
    }

    /// Newest point with `t - lookback <= ts <= t`
    pub fn latest(&mut self, t: i64, lookback: i64) -> Result<Option<Point>, StorageError> {
        self.fill_until(t)?;

        let mint = t.saturating_sub(lookback);
        let end = self.buffer.partition_point(|p| p.t <= t);
        let found = if end == 0 {
            None
        } else {
            let candidate = self.buffer[end - 1];
            (candidate.t >= mint).then_some(candidate)
        };

        self.evict_before(mint.min(t.saturating_sub(self.memo_window)));
        Ok(found)
    }

    /// Number of points currently held in the look-back buffer
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Read from the underlying cursor until a point newer than `maxt` is buffered
    fn fill_until(&mut self, maxt: i64) -> Result<(), StorageError> {
        while !self.exhausted && self.buffer.back().map_or(true, |p| p.t <= maxt) {
            match self.inner.next()? {
                Some(point) => self.buffer.push_back(point),
                None => self.exhausted = true,
            }
        }
        Ok(())
    }

    fn evict_before(&mut self, keep_from: i64) {
        while self.buffer.front().is_some_and(|p| p.t < keep_from) {
            self.buffer.pop_front();
        }
    }
}

impl std::fmt::Debug for MemoizedIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoizedIterator")
            .field("memo_window", &self.memo_window)
            .field("buffered", &self.buffer.len())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}
