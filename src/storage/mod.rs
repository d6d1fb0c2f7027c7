//! Storage interface consumed by the query engine
//!
//! The engine never talks to an on-disk format directly. It resolves series
//! through the small set of traits defined here:
//!
//! ```text
//! Queryable ──querier(range)──▶ Querier ──select(matchers)──▶ SeriesSet
//!                                                                │ next()
//!                                                                ▼
//!                                                          StorageSeries
//!                                                          (labels + SeriesIterator)
//! ```
//!
//! A querier is opened once per series resolution and closed right after the
//! series set has been drained. Point iterators outlive the querier and are
//! wrapped in a [`MemoizedIterator`] by the series selector.

pub mod memoized;
pub mod memory;

pub use memoized::MemoizedIterator;
pub use memory::InMemoryStorage;

use crate::error::StorageError;
use crate::types::{LabelMatcher, Labels, Point, TimeRange};
use std::sync::Arc;

/// Forward-only cursor over the points of one series, in timestamp order
pub trait SeriesIterator: Send {
    /// Advance to the next point, `Ok(None)` once exhausted
    fn next(&mut self) -> Result<Option<Point>, StorageError>;
}

/// One series returned by a [`SeriesSet`]
pub struct StorageSeries {
    /// Label set of the series
    pub labels: Labels,
    /// Cursor over the series' points inside the querier window
    pub iterator: Box<dyn SeriesIterator>,
}

/// Iterator over the series matched by a select call
pub trait SeriesSet: Send {
    /// Next matching series, `Ok(None)` once exhausted
    fn next(&mut self) -> Result<Option<StorageSeries>, StorageError>;
}

/// Read handle over a fixed time window
pub trait Querier: Send {
    /// Select all series matching every matcher
    fn select(&mut self, matchers: &[LabelMatcher]) -> Result<Box<dyn SeriesSet>, StorageError>;

    /// Release the querier
    fn close(&mut self) -> Result<(), StorageError>;
}

/// A storage backend that can open queriers
pub trait Queryable: Send + Sync {
    /// Open a querier over `range` (both ends inclusive)
    fn querier(&self, range: TimeRange) -> Result<Box<dyn Querier>, StorageError>;
}

/// [`SeriesIterator`] over a shared, sorted point buffer restricted to a window
pub struct SliceIterator {
    points: Arc<Vec<Point>>,
    position: usize,
    end: usize,
}

impl SliceIterator {
    /// Iterate over the points of `points` (sorted by timestamp) within `range`
    pub fn new(points: Arc<Vec<Point>>, range: TimeRange) -> Self {
        let position = points.partition_point(|p| p.t < range.start);
        let end = points.partition_point(|p| p.t <= range.end);
        Self {
            points,
            position,
            end: end.max(position),
        }
    }
}

impl SeriesIterator for SliceIterator {
    fn next(&mut self) -> Result<Option<Point>, StorageError> {
        if self.position >= self.end {
            return Ok(None);
        }
        let point = self.points[self.position];
        self.position += 1;
        Ok(Some(point))
    }
}
