//! Per-direction sequence numbering and input gap detection.

/// Monotonic u32 counter for one direction of one stream kind.
#[derive(Debug, Clone, Default)]
pub struct SequenceCounter {
    next: u32,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the next sequence number and advance.
    pub fn next(&mut self) -> u32 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }

    pub fn peek(&self) -> u32 {
        self.next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Process the frame; `gap` frames were lost before it.
    Accept { gap: u32 },
    /// At or behind an already-seen sequence; drop silently.
    Duplicate,
}

/// Tracks incoming audio sequence numbers, starting at 0.
#[derive(Debug, Clone, Default)]
pub struct InputSequenceTracker {
    expected: u32,
    gaps_detected: u64,
    duplicates: u64,
}

impl InputSequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, seq: u32) -> SequenceCheck {
        if seq < self.expected {
            self.duplicates += 1;
            return SequenceCheck::Duplicate;
        }

        let gap = seq - self.expected;
        if gap > 0 {
            self.gaps_detected += gap as u64;
            tracing::debug!(
                expected = self.expected,
                received = seq,
                missing = gap,
                "Input audio gap detected"
            );
        }
        self.expected = seq.wrapping_add(1);
        SequenceCheck::Accept { gap }
    }

    /// Next sequence number expected.
    pub fn expected(&self) -> u32 {
        self.expected
    }

    /// Total frames missing across all gaps.
    pub fn gaps_detected(&self) -> u64 {
        self.gaps_detected
    }

    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_is_monotonic() {
        let mut counter = SequenceCounter::new();
        assert_eq!(counter.next(), 0);
        assert_eq!(counter.next(), 1);
        assert_eq!(counter.peek(), 2);
    }

    #[test]
    fn test_counter_wraps() {
        let mut counter = SequenceCounter { next: u32::MAX };
        assert_eq!(counter.next(), u32::MAX);
        assert_eq!(counter.next(), 0);
    }

    #[test]
    fn test_in_order_frames() {
        let mut tracker = InputSequenceTracker::new();
        for seq in 0..5 {
            assert_eq!(tracker.check(seq), SequenceCheck::Accept { gap: 0 });
        }
        assert_eq!(tracker.gaps_detected(), 0);
    }

    #[test]
    fn test_gap_is_accepted_and_counted() {
        let mut tracker = InputSequenceTracker::new();
        tracker.check(0);
        assert_eq!(tracker.check(4), SequenceCheck::Accept { gap: 3 });
        assert_eq!(tracker.gaps_detected(), 3);
        assert_eq!(tracker.expected(), 5);
    }

    #[test]
    fn test_regression_is_duplicate() {
        let mut tracker = InputSequenceTracker::new();
        tracker.check(0);
        tracker.check(1);
        assert_eq!(tracker.check(1), SequenceCheck::Duplicate);
        assert_eq!(tracker.check(0), SequenceCheck::Duplicate);
        assert_eq!(tracker.duplicates(), 2);
        assert_eq!(tracker.check(2), SequenceCheck::Accept { gap: 0 });
    }
}
