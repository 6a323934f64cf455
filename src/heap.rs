use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::model::{HeapItem, Task};

/// Min-heap of pending tasks keyed by `(priority, createdAt)`.
///
/// `BinaryHeap` is a max-heap, so entries are wrapped in `Reverse` to get "smallest
/// `(priority, createdAt)` pops first."
#[derive(Default)]
pub struct PriorityHeap {
    inner: BinaryHeap<Reverse<HeapItem>>,
}

impl PriorityHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, task: Task) {
        self.inner.push(Reverse(HeapItem { task }));
    }

    pub fn pop(&mut self) -> Option<Task> {
        self.inner.pop().map(|Reverse(item)| item.task)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn peek(&self) -> Option<&Task> {
        self.inner.peek().map(|Reverse(item)| &item.task)
    }
}
