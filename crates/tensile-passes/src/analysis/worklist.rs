//! FIFO worklist with membership dedup.
//!
//! The fixpoint passes push whatever becomes stale and pop until empty;
//! the membership set keeps an item from being queued twice, which keeps
//! every monotone analysis linear in the number of state changes.

use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::hash::Hash;

#[derive(Debug, Default)]
pub struct Worklist<T> {
    queue: VecDeque<T>,
    queued: FxHashSet<T>,
}

impl<T: Copy + Eq + Hash> Worklist<T> {
    pub fn new() -> Worklist<T> {
        Worklist { queue: VecDeque::new(), queued: FxHashSet::default() }
    }

    pub fn seeded(items: impl IntoIterator<Item = T>) -> Worklist<T> {
        let mut list = Worklist::new();
        for item in items {
            list.push(item);
        }
        list
    }

    /// Queue an item unless it is already waiting.
    pub fn push(&mut self, item: T) {
        if self.queued.insert(item) {
            self.queue.push_back(item);
        }
    }

    pub fn pop(&mut self) -> Option<T> {
        let item = self.queue.pop_front()?;
        self.queued.remove(&item);
        Some(item)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
