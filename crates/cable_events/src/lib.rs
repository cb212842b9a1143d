#![forbid(unsafe_code)]

//! Time-ordered queue of synaptic events.
//!
//! Events are delivered to a point-process mechanism identified by its id
//! within the cell, together with a target index inside that mechanism.
//! Equal delivery times are broken by `(mechanism, target, weight)` so that
//! runs with identical inputs pop in identical order.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use cable_core::{MechanismId, TargetId};

/// A synaptic event scheduled for delivery.
#[derive(Debug, Clone, Copy)]
pub struct SynapticEvent {
    /// Delivery time, ms.
    pub time: f64,
    /// Point-process mechanism within the cell.
    pub mechanism: MechanismId,
    /// Target local to the mechanism.
    pub target: TargetId,
    /// Weight handed to `net_receive`, µS.
    pub weight: f64,
}

impl PartialEq for SynapticEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SynapticEvent {}

impl PartialOrd for SynapticEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SynapticEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .total_cmp(&other.time)
            .then_with(|| self.mechanism.cmp(&other.mechanism))
            .then_with(|| self.target.cmp(&other.target))
            .then_with(|| self.weight.total_cmp(&other.weight))
    }
}

/// Min-heap of events ordered by delivery time.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    heap: BinaryHeap<Reverse<SynapticEvent>>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn push(&mut self, event: SynapticEvent) {
        self.heap.push(Reverse(event));
    }

    /// Delivery time of the earliest pending event.
    pub fn next_time(&self) -> Option<f64> {
        self.heap.peek().map(|Reverse(event)| event.time)
    }

    /// Pops the earliest event if it is strictly before `t`, leaving the
    /// queue untouched otherwise.
    pub fn pop_if_before(&mut self, t: f64) -> Option<SynapticEvent> {
        match self.heap.peek() {
            Some(Reverse(event)) if event.time < t => {
                self.heap.pop().map(|Reverse(event)| event)
            }
            _ => None,
        }
    }

    pub fn reset(&mut self) {
        self.heap.clear();
    }
}
