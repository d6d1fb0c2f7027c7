//! Step vectors and the batch pool
//!
//! A [`StepVector`] holds every sample produced for one evaluation timestamp.
//! Operators exchange batches (`Vec<StepVector>`, one entry per consecutive
//! step) and recycle them through a [`VectorPool`] once consumed.
//!
//! # Ownership
//!
//! A batch returned from `next` belongs to the caller. The caller either
//! forwards it upward (handing on the obligation to recycle it) or returns it
//! to the pool of the operator that produced it with
//! [`VectorPool::put_vectors`].

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Upper bound on recycled containers kept by one pool
const MAX_POOLED: usize = 1024;

/// Samples of many series at one evaluation timestamp
///
/// `sample_ids` and `samples` are parallel: index `i` of both refers to the
/// same sample. Ids index into the producing operator's series list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepVector {
    /// Evaluation timestamp in milliseconds
    pub t: i64,
    /// Series identifier of each sample
    pub sample_ids: Vec<u64>,
    /// Sample values
    pub samples: Vec<f64>,
}

impl StepVector {
    /// Create an empty step vector at `t`
    pub fn new(t: i64) -> Self {
        Self {
            t,
            sample_ids: Vec::new(),
            samples: Vec::new(),
        }
    }

    /// Append one sample
    #[inline]
    pub fn push(&mut self, id: u64, value: f64) {
        self.sample_ids.push(id);
        self.samples.push(value);
    }

    /// Number of samples
    #[inline]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Whether the step has no samples
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Keep only the first `len` samples
    pub fn truncate(&mut self, len: usize) {
        self.sample_ids.truncate(len);
        self.samples.truncate(len);
    }

    fn reset(&mut self, t: i64) {
        self.t = t;
        self.sample_ids.clear();
        self.samples.clear();
    }
}

/// Allocation counters of a [`VectorPool`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Batch containers freshly allocated
    pub vectors_allocated: u64,
    /// Batch containers served from the free list
    pub vectors_reused: u64,
    /// Step vectors freshly allocated
    pub step_vectors_allocated: u64,
    /// Step vectors served from the free list
    pub step_vectors_reused: u64,
}

/// Free-list allocator for batches and step vectors
///
/// Shared between an operator and its consumers through `Arc`, so every
/// method takes `&self`.
#[derive(Debug)]
pub struct VectorPool {
    vectors: Mutex<Vec<Vec<StepVector>>>,
    step_vectors: Mutex<Vec<StepVector>>,
    steps_per_batch: usize,
    step_size: AtomicUsize,
    vectors_allocated: AtomicU64,
    vectors_reused: AtomicU64,
    step_vectors_allocated: AtomicU64,
    step_vectors_reused: AtomicU64,
}

impl VectorPool {
    /// Create a pool handing out batches of up to `steps_per_batch` steps
    pub fn new(steps_per_batch: usize) -> Self {
        Self {
            vectors: Mutex::new(Vec::new()),
            step_vectors: Mutex::new(Vec::new()),
            steps_per_batch: steps_per_batch.max(1),
            step_size: AtomicUsize::new(0),
            vectors_allocated: AtomicU64::new(0),
            vectors_reused: AtomicU64::new(0),
            step_vectors_allocated: AtomicU64::new(0),
            step_vectors_reused: AtomicU64::new(0),
        }
    }

    /// Maximum number of steps in one batch
    pub fn steps_per_batch(&self) -> usize {
        self.steps_per_batch
    }

    /// Capacity hint for samples per step (usually the series count)
    pub fn set_step_size(&self, size: usize) {
        self.step_size.store(size, Ordering::Relaxed);
    }

    /// Get an empty batch container
    pub fn get_vectors(&self) -> Vec<StepVector> {
        if let Some(batch) = self.vectors.lock().pop() {
            self.vectors_reused.fetch_add(1, Ordering::Relaxed);
            return batch;
        }
        self.vectors_allocated.fetch_add(1, Ordering::Relaxed);
        Vec::with_capacity(self.steps_per_batch)
    }

    /// Recycle a batch together with every step vector it still holds
    pub fn put_vectors(&self, mut batch: Vec<StepVector>) {
        for step in batch.drain(..) {
            self.put_step_vector(step);
        }
        let mut free = self.vectors.lock();
        if free.len() < MAX_POOLED {
            free.push(batch);
        }
    }

    /// Get an empty step vector stamped with `t`
    pub fn get_step_vector(&self, t: i64) -> StepVector {
        if let Some(mut step) = self.step_vectors.lock().pop() {
            self.step_vectors_reused.fetch_add(1, Ordering::Relaxed);
            step.reset(t);
            return step;
        }
        self.step_vectors_allocated.fetch_add(1, Ordering::Relaxed);
        let capacity = self.step_size.load(Ordering::Relaxed);
        StepVector {
            t,
            sample_ids: Vec::with_capacity(capacity),
            samples: Vec::with_capacity(capacity),
        }
    }

    /// Recycle a single step vector
    pub fn put_step_vector(&self, step: StepVector) {
        let mut free = self.step_vectors.lock();
        if free.len() < MAX_POOLED {
            free.push(step);
        }
    }

    /// Snapshot of the allocation counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            vectors_allocated: self.vectors_allocated.load(Ordering::Relaxed),
            vectors_reused: self.vectors_reused.load(Ordering::Relaxed),
            step_vectors_allocated: self.step_vectors_allocated.load(Ordering::Relaxed),
            step_vectors_reused: self.step_vectors_reused.load(Ordering::Relaxed),
        }
    }
}

impl Default for VectorPool {
    fn default() -> Self {
        Self::new(10)
    }
}
