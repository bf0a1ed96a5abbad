//! # Step Counter
//!
//! A counter that climbs from 1 to `threshold` and is "activated" while it sits
//! on the threshold. A cyclical counter wraps back to 1 on the next advance,
//! which divides a fast heartbeat down to one activation every `threshold`
//! ticks. A non-cyclical counter saturates, which makes it a debounce gate.

use crate::error::{FeedError, FeedResult};

/// Bounded modular (cyclical) or saturating counter.
///
/// Invariant: `1 <= count <= threshold`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepCounter {
    count: u32,
    threshold: u32,
    cyclical: bool,
}

impl StepCounter {
    /// Creates a counter at `count = 1`.
    ///
    /// # Errors
    /// `InvalidArgument` if `threshold` is zero.
    pub fn new(threshold: u32, cyclical: bool) -> FeedResult<Self> {
        Self::check_threshold(threshold)?;
        Ok(Self {
            count: 1,
            threshold,
            cyclical,
        })
    }

    /// Moves the counter one step.
    pub fn advance(&mut self) {
        if self.count < self.threshold {
            self.count += 1;
        } else if self.cyclical {
            self.count = 1;
        }
    }

    /// `true` while the count sits on the threshold.
    pub fn is_activated(&self) -> bool {
        self.count == self.threshold
    }

    /// Replaces the threshold and restarts the count at 1.
    ///
    /// # Errors
    /// `InvalidArgument` if `threshold` is zero; the counter is left untouched.
    pub fn set_threshold(&mut self, threshold: u32) -> FeedResult<()> {
        Self::check_threshold(threshold)?;
        self.threshold = threshold;
        self.count = 1;
        Ok(())
    }

    /// Restarts the count at 1 without touching the threshold.
    pub fn reset(&mut self) {
        self.count = 1;
    }

    /// Current position, always within `1..=threshold`.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Current threshold.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Whether the counter wraps (divider) or saturates (gate).
    pub fn is_cyclical(&self) -> bool {
        self.cyclical
    }

    fn check_threshold(threshold: u32) -> FeedResult<()> {
        if threshold < 1 {
            return Err(FeedError::InvalidArgument(
                "step counter threshold must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_threshold_is_rejected() {
        assert!(matches!(StepCounter::new(0, true), Err(FeedError::InvalidArgument(_))));

        let mut counter = StepCounter::new(3, true).unwrap();
        assert!(counter.set_threshold(0).is_err());
        assert_eq!(counter.threshold(), 3);
    }

    #[test]
    fn test_cyclical_counter_activates_once_per_period() {
        for threshold in 1..=12u32 {
            let mut counter = StepCounter::new(threshold, true).unwrap();
            // A fresh counter starts at 1 and reaches the threshold after threshold - 1 steps.
            for _ in 1..threshold {
                assert!(!counter.is_activated());
                counter.advance();
            }
            assert!(counter.is_activated());

            counter.advance();
            assert_eq!(counter.count(), 1);

            // From here on exactly one activation per `threshold` advances.
            let activations = (0..threshold * 5)
                .filter(|_| {
                    counter.advance();
                    counter.is_activated()
                })
                .count();
            assert_eq!(activations, 5, "threshold {}", threshold);
        }
    }

    #[test]
    fn test_saturating_counter_stays_activated() {
        let mut gate = StepCounter::new(3, false).unwrap();
        assert!(!gate.is_activated());
        gate.advance();
        gate.advance();
        assert!(gate.is_activated());
        for _ in 0..100 {
            gate.advance();
            assert!(gate.is_activated());
            assert_eq!(gate.count(), 3);
        }
    }

    #[test]
    fn test_set_threshold_and_reset_restart_count() {
        let mut counter = StepCounter::new(5, true).unwrap();
        counter.advance();
        counter.advance();
        assert_eq!(counter.count(), 3);

        counter.set_threshold(2).unwrap();
        assert_eq!(counter.count(), 1);
        counter.advance();
        assert!(counter.is_activated());

        counter.reset();
        assert_eq!(counter.count(), 1);
        assert_eq!(counter.threshold(), 2);
    }
}
