// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

//! CONTEXT: Virtual timeline for deferred IOS continuations
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: Unit tests in this crate
//!
//! INVARIANTS:
//! - Events fire in deadline order; equal deadlines fire in scheduling order
//! - `reschedule` leaves at most one pending event per event kind
//! - Time never moves backwards

use core::mem::{discriminant, Discriminant};

/// Time base ticks.
pub type Tick = u64;

/// Tick cost accumulated while serving one request.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Ticks(Tick);

impl Ticks {
    /// Starts an empty accumulator.
    pub const fn new() -> Self {
        Self(0)
    }

    /// Adds `ticks` to the running total.
    pub fn add(&mut self, ticks: Tick) {
        self.0 = self.0.saturating_add(ticks);
    }

    /// Returns the running total.
    pub const fn get(self) -> Tick {
        self.0
    }
}

#[derive(Debug)]
struct Scheduled<E> {
    deadline: Tick,
    seq: u64,
    event: E,
}

/// Single-threaded queue of continuations keyed on virtual time.
///
/// Events are identified by their enum variant: [`Timeline::remove`]
/// cancels every pending event of the same variant as its argument.
#[derive(Debug)]
pub struct Timeline<E> {
    now: Tick,
    next_seq: u64,
    events: Vec<Scheduled<E>>,
}

impl<E> Timeline<E> {
    /// Creates an empty timeline at tick 0.
    pub fn new() -> Self {
        Self { now: 0, next_seq: 0, events: Vec::new() }
    }

    /// Current virtual time.
    pub fn now(&self) -> Tick {
        self.now
    }

    /// Number of pending events.
    pub fn pending(&self) -> usize {
        self.events.len()
    }

    /// Schedules `event` to fire `delay` ticks from now.
    pub fn schedule(&mut self, delay: Tick, event: E) {
        let deadline = self.now.saturating_add(delay);
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.events.push(Scheduled { deadline, seq, event });
    }

    /// Cancels every pending event of the same kind as `kind`; returns how many were dropped.
    pub fn remove(&mut self, kind: &E) -> usize {
        let target: Discriminant<E> = discriminant(kind);
        let before = self.events.len();
        self.events.retain(|entry| discriminant(&entry.event) != target);
        before - self.events.len()
    }

    /// Cancels pending events of the same kind, then schedules `event`.
    pub fn reschedule(&mut self, delay: Tick, event: E) {
        self.remove(&event);
        self.schedule(delay, event);
    }

    /// Returns whether an event of the same kind as `kind` is pending.
    pub fn is_pending(&self, kind: &E) -> bool {
        let target = discriminant(kind);
        self.events.iter().any(|entry| discriminant(&entry.event) == target)
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Tick> {
        self.events.iter().map(|entry| entry.deadline).min()
    }

    /// Pops the next event due at or before `until`, moving `now` to its deadline.
    pub fn pop_due(&mut self, until: Tick) -> Option<E> {
        let (pos, _) = self
            .events
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.deadline <= until)
            .min_by_key(|(_, entry)| (entry.deadline, entry.seq))?;
        let entry = self.events.remove(pos);
        self.now = self.now.max(entry.deadline);
        Some(entry.event)
    }

    /// Moves `now` forward to `target` without firing anything.
    pub fn advance_to(&mut self, target: Tick) {
        self.now = self.now.max(target);
    }
}

impl<E> Default for Timeline<E> {
    fn default() -> Self {
        Self::new()
    }
}
