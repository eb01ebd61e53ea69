//! Fixed-capacity rolling buffers used to damp per-frame jitter.

use std::collections::VecDeque;

/// Default number of samples kept by the scale and rotation buffers.
pub const DEFAULT_CAPACITY: usize = 5;

/// Rolling window of the most recent samples; the oldest is dropped once
/// the window is full.
#[derive(Debug, Clone, PartialEq)]
pub struct RollingBuffer {
    samples: VecDeque<f32>,
    capacity: usize,
}

impl Default for RollingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl RollingBuffer {
    /// A zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a sample and return the mean of the window.
    pub fn push(&mut self, value: f32) -> f32 {
        self.samples.push_back(value);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        self.mean()
    }

    /// Mean of the current window, 0.0 when empty.
    pub fn mean(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f32>() / self.samples.len() as f32
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
