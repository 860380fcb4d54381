//! Bounded ring of training samples.
//!
//! Execution feeds `(features, actual, predicted)` triples in as queries
//! finish; incremental training reads the tail back out. The ring is the
//! sliding window: once full, the oldest sample is dropped for each new one.

use std::collections::VecDeque;
use std::sync::LazyLock;

use parking_lot::Mutex;

use crate::features::FeatureVector;

/// Default ring capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 10_000;

/// One observed execution outcome, immutable after insertion.
#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub features: FeatureVector,
    pub actual_cardinality: u64,
    pub predicted_cardinality: u64,
    /// `max(actual/predicted, predicted/actual)` with zeros treated as 1
    pub q_error: f64,
}

impl TrainingSample {
    fn new(features: FeatureVector, actual: u64, predicted: u64) -> Self {
        let a = actual.max(1) as f64;
        let p = predicted.max(1) as f64;
        Self {
            features,
            actual_cardinality: actual,
            predicted_cardinality: predicted,
            q_error: (a / p).max(p / a),
        }
    }
}

/// Thread-safe bounded FIFO of training samples.
pub struct TrainingBuffer {
    samples: Mutex<VecDeque<TrainingSample>>,
    capacity: usize,
}

impl TrainingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY)
    }

    /// The process-wide buffer instance.
    pub fn global() -> &'static TrainingBuffer {
        static BUFFER: LazyLock<TrainingBuffer> =
            LazyLock::new(TrainingBuffer::with_default_capacity);
        &BUFFER
    }

    /// Push a sample, computing its q-error; drops the oldest when full.
    pub fn add_sample(&self, features: FeatureVector, actual: u64, predicted: u64) {
        let sample = TrainingSample::new(features, actual, predicted);
        let mut samples = self.samples.lock();
        if samples.len() >= self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    /// Copy out the tail-most `min(k, len)` samples in insertion order.
    pub fn recent_samples(&self, k: usize) -> Vec<TrainingSample> {
        let samples = self.samples.lock();
        let take = k.min(samples.len());
        samples.iter().skip(samples.len() - take).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.lock().is_empty()
    }

    pub fn clear(&self) {
        self.samples.lock().clear();
    }
}
