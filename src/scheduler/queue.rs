//! Min-heap of tasks ordered by due time

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::error::{Result, WatchdogError};

use super::task::Task;

/// Heap entry; `BinaryHeap` is a max-heap, so the ordering is reversed to pop
/// the earliest due task first. Equal due times come out in unspecified order.
struct Entry(Task);

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.0.due() == other.0.due()
    }
}

impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.0.due().cmp(&self.0.due())
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Default)]
pub struct TaskQueue {
    heap: BinaryHeap<Entry>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a task. On failure the task is dropped, never leaked.
    pub fn enqueue(&mut self, task: Task) -> Result<()> {
        self.heap
            .try_reserve(1)
            .map_err(|_| WatchdogError::Allocation("task queue slot"))?;
        self.heap.push(Entry(task));
        Ok(())
    }

    /// Remove the earliest due task
    pub fn dequeue(&mut self) -> Option<Task> {
        self.heap.pop().map(|entry| entry.0)
    }

    pub fn peek(&self) -> Option<&Task> {
        self.heap.peek().map(|entry| &entry.0)
    }

    /// Remove the first task matching `pred`. O(n), rebuilds the heap.
    pub fn erase<P>(&mut self, mut pred: P) -> Option<Task>
    where
        P: FnMut(&Task) -> bool,
    {
        let mut entries = std::mem::take(&mut self.heap).into_vec();
        let found = entries
            .iter()
            .position(|entry| pred(&entry.0))
            .map(|idx| entries.swap_remove(idx).0);
        self.heap = BinaryHeap::from(entries);
        found
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Drop every queued task
    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
