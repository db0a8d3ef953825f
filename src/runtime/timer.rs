//! Timer list for deadline management.
//!
//! This module provides a small min-heap of `(deadline, target)` pairs kept
//! in deadline order. Entries with equal deadlines pop in insertion order.
//!
//! The list is owned by the scheduler thread; nothing reachable from a
//! background thread holds a reference to it.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;

#[derive(Debug)]
struct TimerEntry<T> {
    deadline: Duration,
    generation: u64,
    target: T,
}

impl<T> PartialEq for TimerEntry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.generation == other.generation
    }
}

impl<T> Eq for TimerEntry<T> {}

impl<T> Ord for TimerEntry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap (earliest deadline first).
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

impl<T> PartialOrd for TimerEntry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A min-heap of timers ordered by deadline, then by insertion.
#[derive(Debug)]
pub(crate) struct TimerList<T> {
    heap: BinaryHeap<TimerEntry<T>>,
    next_generation: u64,
}

impl<T> Default for TimerList<T> {
    fn default() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_generation: 0,
        }
    }
}

impl<T> TimerList<T> {
    /// Creates a new empty timer list.
    #[must_use]
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the number of pending timers.
    #[must_use]
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    /// Adds a timer for `target` at `deadline`.
    pub(crate) fn insert(&mut self, deadline: Duration, target: T) {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.heap.push(TimerEntry {
            deadline,
            generation,
            target,
        });
    }

    /// Returns the earliest deadline, if any.
    #[must_use]
    pub(crate) fn peek_deadline(&self) -> Option<Duration> {
        self.heap.peek().map(|e| e.deadline)
    }

    /// Returns the generation the next inserted timer will receive.
    ///
    /// Used as a cutoff so timers armed while firing wait for the next pass.
    #[must_use]
    pub(crate) fn watermark(&self) -> u64 {
        self.next_generation
    }

    /// Pops the earliest timer if its deadline is `<= now` and it was
    /// inserted before `watermark`.
    pub(crate) fn pop_due(&mut self, now: Duration, watermark: u64) -> Option<T> {
        let entry = self.heap.peek()?;
        if entry.deadline > now || entry.generation >= watermark {
            return None;
        }
        self.heap.pop().map(|e| e.target)
    }
}
