//! In-memory storage backend
//!
//! A [`Queryable`] over series held in memory. Used as the reference backend
//! for tests and benchmarks, and as a template for storage adapters:
//! - Series are returned in label-set order
//! - Every querier call is counted, as is every close
//! - A one-shot failure can be injected into the next querier call

use crate::error::StorageError;
use crate::storage::{Querier, Queryable, SeriesSet, SliceIterator, StorageSeries};
use crate::types::{LabelMatcher, Labels, Point, TimeRange};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Storage backend keeping all series in memory
#[derive(Default)]
pub struct InMemoryStorage {
    series: RwLock<BTreeMap<Labels, Arc<Vec<Point>>>>,
    querier_calls: AtomicUsize,
    closed_queriers: Arc<AtomicUsize>,
    fail_next: Mutex<Option<StorageError>>,
    querier_delay: Option<Duration>,
}

impl InMemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every querier call (widens race windows in tests)
    pub fn with_querier_delay(mut self, delay: Duration) -> Self {
        self.querier_delay = Some(delay);
        self
    }

    /// Add points to a series, creating it if needed
    ///
    /// Points are kept sorted by timestamp; a duplicate timestamp overwrites
    /// the previous value.
    pub fn add_series(&self, labels: Labels, points: impl IntoIterator<Item = Point>) {
        let mut series = self.series.write();
        let entry = series.entry(labels).or_default();
        let merged = Arc::make_mut(entry);
        for point in points {
            match merged.binary_search_by_key(&point.t, |p| p.t) {
                Ok(i) => merged[i] = point,
                Err(i) => merged.insert(i, point),
            }
        }
    }

    /// Number of series stored
    pub fn series_count(&self) -> usize {
        self.series.read().len()
    }

    /// Number of queriers opened so far
    pub fn querier_calls(&self) -> usize {
        self.querier_calls.load(Ordering::SeqCst)
    }

    /// Number of queriers closed so far
    pub fn closed_queriers(&self) -> usize {
        self.closed_queriers.load(Ordering::SeqCst)
    }

    /// Make the next querier call fail with `err`
    pub fn fail_next_querier(&self, err: StorageError) {
        *self.fail_next.lock() = Some(err);
    }
}

impl Queryable for InMemoryStorage {
    fn querier(&self, range: TimeRange) -> Result<Box<dyn Querier>, StorageError> {
        self.querier_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.querier_delay {
            std::thread::sleep(delay);
        }
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err);
        }

        let snapshot = self
            .series
            .read()
            .iter()
            .map(|(labels, points)| (labels.clone(), points.clone()))
            .collect();

        Ok(Box::new(MemoryQuerier {
            snapshot,
            range,
            closed: false,
            closed_counter: self.closed_queriers.clone(),
        }))
    }
}

struct MemoryQuerier {
    snapshot: Vec<(Labels, Arc<Vec<Point>>)>,
    range: TimeRange,
    closed: bool,
    closed_counter: Arc<AtomicUsize>,
}

impl Querier for MemoryQuerier {
    fn select(&mut self, matchers: &[LabelMatcher]) -> Result<Box<dyn SeriesSet>, StorageError> {
        if self.closed {
            return Err(StorageError::Closed);
        }
        let matched: Vec<(Labels, Arc<Vec<Point>>)> = self
            .snapshot
            .iter()
            .filter(|(labels, _)| matchers.iter().all(|m| m.matches(labels)))
            .cloned()
            .collect();
        Ok(Box::new(MemorySeriesSet {
            series: matched.into_iter(),
            range: self.range,
        }))
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if !self.closed {
            self.closed = true;
            self.closed_counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MemorySeriesSet {
    series: std::vec::IntoIter<(Labels, Arc<Vec<Point>>)>,
    range: TimeRange,
}

impl SeriesSet for MemorySeriesSet {
    fn next(&mut self) -> Result<Option<StorageSeries>, StorageError> {
        Ok(self.series.next().map(|(labels, points)| StorageSeries {
            labels,
            iterator: Box::new(SliceIterator::new(points, self.range)),
        }))
    }
}
