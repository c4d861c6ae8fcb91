//! Bounded, ordered audit event buffer.
//!
//! The buffer favors recent observability over ancient history: on overflow
//! the oldest events are discarded, never the newest. A one-shot warning
//! fires when occupancy crosses 80% of capacity and rearms only once it
//! falls back under.

use std::collections::VecDeque;

use tracing::{debug, warn};

use super::AuditEvent;

/// Ordered FIFO of audit events with a hard capacity.
#[derive(Debug)]
pub struct BoundedBuffer {
    events: VecDeque<AuditEvent>,
    capacity: usize,
    next_seq: u64,
    high_water_warned: bool,
    dropped_total: u64,
}

impl BoundedBuffer {
    /// Create a buffer with the given capacity.
    ///
    /// A zero capacity makes every push a logged no-op.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::new(),
            capacity,
            next_seq: 0,
            high_water_warned: false,
            dropped_total: 0,
        }
    }

    /// Number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` when no events are buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total events discarded to overflow since construction.
    #[must_use]
    pub const fn dropped_total(&self) -> u64 {
        self.dropped_total
    }

    /// Append an event, stamping its enqueue sequence.
    ///
    /// Returns the assigned sequence, or `None` when the event was dropped
    /// because the capacity is zero.
    pub fn push(&mut self, mut event: AuditEvent) -> Option<u64> {
        if self.capacity == 0 {
            debug!("audit buffer capacity is zero; dropping event");
            return None;
        }

        while self.events.len() >= self.capacity {
            self.events.pop_front();
            self.dropped_total += 1;
            warn!(
                dropped_total = self.dropped_total,
                "audit buffer full; dropped oldest event"
            );
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        event.enqueue_seq = seq;
        self.events.push_back(event);
        self.check_high_water();
        Some(seq)
    }

    /// Put a detached batch back at the front, preserving its order, then
    /// re-enforce the capacity (oldest dropped first).
    pub fn prepend(&mut self, batch: Vec<AuditEvent>) {
        for event in batch.into_iter().rev() {
            self.events.push_front(event);
        }
        while self.events.len() > self.capacity {
            self.events.pop_front();
            self.dropped_total += 1;
        }
        self.check_high_water();
    }

    /// Detach the whole buffer as an ordered batch.
    pub fn detach(&mut self) -> Vec<AuditEvent> {
        let batch: Vec<AuditEvent> = std::mem::take(&mut self.events).into();
        self.check_high_water();
        batch
    }

    /// Iterate the buffered events in order.
    pub fn iter(&self) -> impl Iterator<Item = &AuditEvent> {
        self.events.iter()
    }

    /// One-shot 80% occupancy warning with rearm below the mark.
    fn check_high_water(&mut self) {
        if self.capacity == 0 {
            return;
        }
        let high_water = self.capacity * 4 / 5;
        if self.events.len() >= high_water && high_water > 0 {
            if !self.high_water_warned {
                self.high_water_warned = true;
                warn!(
                    len = self.events.len(),
                    capacity = self.capacity,
                    "audit buffer above 80% of capacity"
                );
            }
        } else {
            self.high_water_warned = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{EventDraft, EventKind, EventOutcome};

    fn event() -> AuditEvent {
        EventDraft::new(EventKind::ToolCallAttempt, EventOutcome::Allowed)
            .into_event("u", "o", false)
    }

    #[test]
    fn test_push_stamps_monotone_sequence() {
        let mut buffer = BoundedBuffer::new(10);
        assert_eq!(buffer.push(event()), Some(0));
        assert_eq!(buffer.push(event()), Some(1));
        assert_eq!(buffer.push(event()), Some(2));

        let seqs: Vec<u64> = buffer.iter().map(|e| e.enqueue_seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut buffer = BoundedBuffer::new(3);
        for _ in 0..5 {
            buffer.push(event());
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped_total(), 2);

        let seqs: Vec<u64> = buffer.iter().map(|e| e.enqueue_seq).collect();
        assert_eq!(seqs, vec![2, 3, 4]);
    }

    #[test]
    fn test_zero_capacity_drops_everything() {
        let mut buffer = BoundedBuffer::new(0);
        assert_eq!(buffer.push(event()), None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_detach_empties_and_preserves_order() {
        let mut buffer = BoundedBuffer::new(10);
        for _ in 0..4 {
            buffer.push(event());
        }
        let batch = buffer.detach();
        assert!(buffer.is_empty());
        let seqs: Vec<u64> = batch.iter().map(|e| e.enqueue_seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_prepend_restores_failed_batch_in_order() {
        let mut buffer = BoundedBuffer::new(10);
        for _ in 0..3 {
            buffer.push(event());
        }
        let batch = buffer.detach();

        // Two new events arrive while the flush is in flight.
        buffer.push(event());
        buffer.push(event());

        buffer.prepend(batch);
        let seqs: Vec<u64> = buffer.iter().map(|e| e.enqueue_seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_prepend_enforces_capacity_dropping_oldest() {
        let mut buffer = BoundedBuffer::new(4);
        for _ in 0..3 {
            buffer.push(event());
        }
        let batch = buffer.detach();

        for _ in 0..3 {
            buffer.push(event());
        }

        buffer.prepend(batch);
        assert_eq!(buffer.len(), 4);
        let seqs: Vec<u64> = buffer.iter().map(|e| e.enqueue_seq).collect();
        // Oldest (0, 1) fell off the front.
        assert_eq!(seqs, vec![2, 3, 4, 5]);
    }
}
