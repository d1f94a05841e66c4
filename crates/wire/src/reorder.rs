//! Reassembly of out-of-order control messages.

use std::collections::BTreeMap;

use crate::message::ControlMessage;

pub const DEFAULT_REORDER_CAPACITY: usize = 50;

/// What happened to a pushed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    InOrder,
    /// Ahead of the expected sequence; held back.
    Buffered,
    /// Already delivered or already buffered; dropped.
    Stale,
    /// Buffer full: the lowest buffered message was dropped and the gap before
    /// it abandoned.
    Overflow { dropped_seq: u32 },
}

#[derive(Debug)]
pub struct Pushed {
    pub admission: Admission,
    /// Messages now deliverable, in sequence order.
    pub ready: Vec<ControlMessage>,
}

/// Bounded reorder buffer for one inbound control stream, starting at 0.
#[derive(Debug)]
pub struct ReorderBuffer {
    capacity: usize,
    expected: u32,
    pending: BTreeMap<u32, ControlMessage>,
}

impl Default for ReorderBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_REORDER_CAPACITY)
    }
}

impl ReorderBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            expected: 0,
            pending: BTreeMap::new(),
        }
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, message: ControlMessage) -> Pushed {
        let seq = message.seq;

        if seq < self.expected || self.pending.contains_key(&seq) {
            tracing::debug!(seq, expected = self.expected, "Dropping stale control message");
            return Pushed {
                admission: Admission::Stale,
                ready: Vec::new(),
            };
        }

        if seq == self.expected {
            let mut ready = vec![message];
            self.expected = self.expected.wrapping_add(1);
            self.drain_into(&mut ready);
            return Pushed {
                admission: Admission::InOrder,
                ready,
            };
        }

        if self.pending.len() >= self.capacity {
            // The lowest of the buffered messages and the new one goes.
            let lowest = self.pending.first_key_value().map_or(seq, |(&first, _)| first);
            let dropped_seq = if seq < lowest {
                seq
            } else {
                self.pending.remove(&lowest);
                self.pending.insert(seq, message);
                lowest
            };
            tracing::warn!(
                dropped_seq,
                skipped_from = self.expected,
                capacity = self.capacity,
                "Reorder buffer overflow, abandoning gap"
            );
            // dropped_seq >= expected here, so expected only moves forward.
            self.expected = dropped_seq.wrapping_add(1);
            let mut ready = Vec::new();
            self.drain_into(&mut ready);
            return Pushed {
                admission: Admission::Overflow { dropped_seq },
                ready,
            };
        }

        self.pending.insert(seq, message);
        Pushed {
            admission: Admission::Buffered,
            ready: Vec::new(),
        }
    }

    fn drain_into(&mut self, ready: &mut Vec<ControlMessage>) {
        while let Some(next) = self.pending.remove(&self.expected) {
            ready.push(next);
            self.expected = self.expected.wrapping_add(1);
        }
    }
}
