//! # Running Window Average
//!
//! Estimates how long one polling cycle takes. A small bounded FIFO window
//! rides out a single slow call without lagging far behind a sustained change,
//! and the estimate is withheld until `min_ready` samples are in.

use std::collections::VecDeque;

use crate::error::{FeedError, FeedResult};

/// Fixed-capacity FIFO sample window with an O(1) running mean.
#[derive(Debug, Clone)]
pub struct RunningWindowAverage {
    samples: VecDeque<f64>,
    capacity: usize,
    min_ready: usize,
    running_sum: f64,
}

impl RunningWindowAverage {
    /// Creates an empty window.
    ///
    /// # Errors
    /// `InvalidArgument` unless `1 <= min_ready <= capacity`.
    pub fn new(capacity: usize, min_ready: usize) -> FeedResult<Self> {
        if min_ready < 1 || capacity < min_ready {
            return Err(FeedError::InvalidArgument(format!(
                "window needs 1 <= min_ready <= capacity (got min_ready={}, capacity={})",
                min_ready, capacity
            )));
        }
        Ok(Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            min_ready,
            running_sum: 0.0,
        })
    }

    /// Appends a sample, evicting the oldest one when the window is full.
    pub fn add_sample(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            if let Some(oldest) = self.samples.pop_front() {
                self.running_sum -= oldest;
            }
        }
        self.samples.push_back(value);
        self.running_sum += value;
    }

    /// Arithmetic mean of the retained samples.
    ///
    /// # Errors
    /// `NotReady` while fewer than `min_ready` samples are held.
    pub fn mean(&self) -> FeedResult<f64> {
        if !self.is_ready() {
            return Err(FeedError::NotReady(format!(
                "{} of {} samples collected",
                self.samples.len(),
                self.min_ready
            )));
        }
        Ok(self.running_sum / self.samples.len() as f64)
    }

    /// `true` once `min_ready` samples are held.
    pub fn is_ready(&self) -> bool {
        self.samples.len() >= self.min_ready
    }

    /// `true` once the window is full.
    pub fn is_fully_ready(&self) -> bool {
        self.samples.len() == self.capacity
    }

    /// Drops every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
        self.running_sum = 0.0;
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// `true` if no sample is held.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Retained samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_shapes_are_rejected() {
        assert!(RunningWindowAverage::new(8, 0).is_err());
        assert!(RunningWindowAverage::new(2, 3).is_err());
        assert!(RunningWindowAverage::new(3, 3).is_ok());
    }

    #[test]
    fn test_mean_is_withheld_until_min_ready() {
        let mut window = RunningWindowAverage::new(8, 3).unwrap();
        assert!(matches!(window.mean(), Err(FeedError::NotReady(_))));
        window.add_sample(10.0);
        window.add_sample(20.0);
        assert!(matches!(window.mean(), Err(FeedError::NotReady(_))));
        window.add_sample(30.0);
        assert!(window.is_ready());
        assert!(!window.is_fully_ready());
        assert!((window.mean().unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_overflow_keeps_last_capacity_samples() {
        let capacity = 8;
        let mut window = RunningWindowAverage::new(capacity, 3).unwrap();
        let extra = 5;
        for i in 0..(capacity + extra) {
            window.add_sample(i as f64);
        }
        assert_eq!(window.len(), capacity);
        assert!(window.is_fully_ready());
        let kept: Vec<f64> = window.samples().collect();
        let expected: Vec<f64> = (extra..capacity + extra).map(|i| i as f64).collect();
        assert_eq!(kept, expected);
    }

    #[test]
    fn test_mean_matches_arithmetic_mean_of_window() {
        let mut window = RunningWindowAverage::new(5, 1).unwrap();
        let inputs = [120.5, 3.0, 48.25, 900.0, 0.5, 77.0, 13.0, 4.75, 250.0, 61.0];
        for (i, value) in inputs.iter().enumerate() {
            window.add_sample(*value);
            let start = (i + 1).saturating_sub(5);
            let retained = &inputs[start..=i];
            let expected = retained.iter().sum::<f64>() / retained.len() as f64;
            assert!((window.mean().unwrap() - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_clear_empties_window() {
        let mut window = RunningWindowAverage::new(4, 2).unwrap();
        window.add_sample(1.0);
        window.add_sample(2.0);
        window.clear();
        assert!(window.is_empty());
        assert!(window.mean().is_err());
        window.add_sample(6.0);
        window.add_sample(8.0);
        assert!((window.mean().unwrap() - 7.0).abs() < 1e-9);
    }
}
