//! Cancellable event scheduler ordered by timestamp then scheduling order.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;

use dashload_core::SimTime;

use crate::SimulationError;
use crate::clock::SimClock;

/// Maximum number of live events that can be queued.
pub const MAX_EVENT_QUEUE_SIZE: usize = 100_000;

/// Opaque handle to a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(u64);

struct ScheduledEvent<E> {
    id: u64,
    at: SimTime,
    event: E,
}

impl<E> PartialEq for ScheduledEvent<E> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<E> Eq for ScheduledEvent<E> {}

impl<E> Ord for ScheduledEvent<E> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed for min-heap behavior; equal timestamps keep scheduling order.
        match self.at.cmp(&other.at) {
            Ordering::Equal => other.id.cmp(&self.id),
            ordering => ordering.reverse(),
        }
    }
}

impl<E> PartialOrd for ScheduledEvent<E> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Single-threaded event queue driving one simulated run.
///
/// Cancelled events stay in the heap and are skipped when popped.
pub struct EventScheduler<E> {
    clock: SimClock,
    queue: BinaryHeap<ScheduledEvent<E>>,
    pending: HashSet<u64>,
    next_id: u64,
    processed: u64,
}

impl<E> Default for EventScheduler<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> EventScheduler<E> {
    pub fn new() -> Self {
        Self {
            clock: SimClock::new(),
            queue: BinaryHeap::new(),
            pending: HashSet::new(),
            next_id: 0,
            processed: 0,
        }
    }

    pub fn now(&self) -> SimTime {
        self.clock.now()
    }

    /// Schedules `event` at absolute time `at`.
    ///
    /// # Errors
    ///
    /// - `SimulationError::InvalidEventScheduling` - `at` is before the current time
    /// - `SimulationError::EventQueueOverflow` - Event queue is full
    pub fn schedule_at(&mut self, at: SimTime, event: E) -> Result<EventHandle, SimulationError> {
        if at < self.clock.now() {
            return Err(SimulationError::InvalidEventScheduling {
                reason: format!("Event at {} is before current time {}", at, self.clock.now()),
            });
        }
        if self.queue.len() >= MAX_EVENT_QUEUE_SIZE {
            // Drop cancelled entries before judging the queue full.
            self.queue.retain(|scheduled| self.pending.contains(&scheduled.id));
        }
        if self.pending.len() >= MAX_EVENT_QUEUE_SIZE {
            return Err(SimulationError::EventQueueOverflow {
                count: self.pending.len(),
            });
        }

        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(id);
        self.queue.push(ScheduledEvent { id, at, event });
        Ok(EventHandle(id))
    }

    /// Schedules `event` after `delay`.
    ///
    /// # Errors
    ///
    /// - `SimulationError::EventQueueOverflow` - Event queue is full
    pub fn schedule_in(&mut self, delay: Duration, event: E) -> Result<EventHandle, SimulationError> {
        let at = self.clock.now() + delay;
        self.schedule_at(at, event)
    }

    /// Cancels a scheduled event.
    ///
    /// Returns false when the event already fired or was already cancelled.
    pub fn cancel(&mut self, handle: EventHandle) -> bool {
        self.pending.remove(&handle.0)
    }

    pub fn is_pending(&self, handle: EventHandle) -> bool {
        self.pending.contains(&handle.0)
    }

    /// Pops the next live event at or before `limit`, advancing the clock to it.
    ///
    /// # Errors
    ///
    /// - `SimulationError::InvalidEventScheduling` - Clock would move backwards
    pub fn pop_until(&mut self, limit: SimTime) -> Result<Option<(SimTime, E)>, SimulationError> {
        while let Some(next) = self.queue.peek() {
            if next.at > limit {
                break;
            }
            let Some(scheduled) = self.queue.pop() else {
                break;
            };
            if !self.pending.remove(&scheduled.id) {
                continue;
            }

            self.clock.advance_to(scheduled.at)?;
            self.processed += 1;
            return Ok(Some((scheduled.at, scheduled.event)));
        }
        Ok(None)
    }

    /// Live events still waiting to fire.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn events_processed(&self) -> u64 {
        self.processed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_fire_in_time_order() {
        let mut scheduler = EventScheduler::new();
        scheduler.schedule_at(SimTime::from_millis(30), "c").unwrap();
        scheduler.schedule_at(SimTime::from_millis(10), "a").unwrap();
        scheduler.schedule_at(SimTime::from_millis(20), "b").unwrap();

        let mut fired = Vec::new();
        while let Some((at, event)) = scheduler.pop_until(SimTime::from_secs(1)).unwrap() {
            fired.push((at.as_millis(), event));
        }
        assert_eq!(fired, vec![(10, "a"), (20, "b"), (30, "c")]);
        assert_eq!(scheduler.now(), SimTime::from_millis(30));
        assert_eq!(scheduler.events_processed(), 3);
    }

    #[test]
    fn test_equal_timestamps_fire_in_scheduling_order() {
        let mut scheduler = EventScheduler::new();
        for i in 0..50 {
            scheduler.schedule_at(SimTime::from_millis(5), i).unwrap();
        }

        let mut fired = Vec::new();
        while let Some((_, event)) = scheduler.pop_until(SimTime::from_millis(5)).unwrap() {
            fired.push(event);
        }
        assert_eq!(fired, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut scheduler = EventScheduler::new();
        let handle = scheduler.schedule_in(Duration::from_millis(1), "x").unwrap();
        let kept = scheduler.schedule_in(Duration::from_millis(2), "y").unwrap();

        assert!(scheduler.is_pending(handle));
        assert!(scheduler.cancel(handle));
        assert!(!scheduler.cancel(handle));
        assert!(!scheduler.is_pending(handle));

        let (_, event) = scheduler.pop_until(SimTime::from_secs(1)).unwrap().unwrap();
        assert_eq!(event, "y");
        // Cancelling an event that already fired is a no-op.
        assert!(!scheduler.cancel(kept));
        assert!(scheduler.pop_until(SimTime::from_secs(1)).unwrap().is_none());
    }

    #[test]
    fn test_limit_leaves_later_events_queued() {
        let mut scheduler = EventScheduler::new();
        scheduler.schedule_at(SimTime::from_millis(50), ()).unwrap();

        assert!(scheduler.pop_until(SimTime::from_millis(10)).unwrap().is_none());
        assert_eq!(scheduler.pending_count(), 1);
        assert!(scheduler.pop_until(SimTime::from_millis(50)).unwrap().is_some());
    }

    #[test]
    fn test_rejects_past_events() {
        let mut scheduler = EventScheduler::new();
        scheduler.schedule_at(SimTime::from_millis(10), ()).unwrap();
        scheduler.pop_until(SimTime::from_millis(10)).unwrap();

        let result = scheduler.schedule_at(SimTime::from_millis(5), ());
        assert!(matches!(
            result,
            Err(SimulationError::InvalidEventScheduling { .. })
        ));
    }

    #[test]
    fn test_queue_overflow() {
        let mut scheduler = EventScheduler::new();
        for _ in 0..MAX_EVENT_QUEUE_SIZE {
            scheduler.schedule_in(Duration::ZERO, ()).unwrap();
        }
        assert!(matches!(
            scheduler.schedule_in(Duration::ZERO, ()),
            Err(SimulationError::EventQueueOverflow { .. })
        ));
    }

    #[test]
    fn test_cancelled_events_free_queue_slots() {
        let mut scheduler = EventScheduler::new();
        let handles: Vec<_> = (0..MAX_EVENT_QUEUE_SIZE)
            .map(|_| scheduler.schedule_in(Duration::from_millis(1), ()).unwrap())
            .collect();
        for handle in handles {
            assert!(scheduler.cancel(handle));
        }
        assert_eq!(scheduler.pending_count(), 0);

        let handle = scheduler.schedule_in(Duration::from_millis(2), ()).unwrap();
        assert!(scheduler.is_pending(handle));
        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(scheduler.queue.len(), 1);

        let (at, ()) = scheduler.pop_until(SimTime::from_secs(1)).unwrap().unwrap();
        assert_eq!(at, SimTime::from_millis(2));
        assert!(scheduler.pop_until(SimTime::from_secs(1)).unwrap().is_none());
    }
}
