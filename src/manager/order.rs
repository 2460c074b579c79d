//! Admission order of QUEUED entries.

use std::cmp::Ordering;
use std::fmt;

use crate::queue::QueueEntry;

/// Comparator deciding which QUEUED entry gets the next free slot.
pub trait AdmissionOrder: Send + Sync + fmt::Debug {
    /// Orders `a` before `b` when it should be admitted first.
    fn compare(&self, a: &QueueEntry, b: &QueueEntry) -> Ordering;
}

/// First in, first out by `(created_at, id)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoOrder;

impl AdmissionOrder for FifoOrder {
    fn compare(&self, a: &QueueEntry, b: &QueueEntry) -> Ordering {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    }
}
