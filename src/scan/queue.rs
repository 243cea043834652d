//! Ordered, operator-editable queue.
//!
//! Every index-based edit is bounds-checked. An out-of-range index (or moving the
//! first item up / the last item down) leaves the queue untouched and reports
//! nothing; callers that care can inspect the returned value.

use crate::scan::request::ScanRequest;

/// Queue of scan requests awaiting a run.
pub type ScanQueue = OrderedQueue<ScanRequest>;

/// Insertion-ordered queue with swap-based reordering.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedQueue<T> {
    items: Vec<T>,
}

impl<T> Default for OrderedQueue<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> OrderedQueue<T> {
    /// An empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an item at the back.
    pub fn enqueue(&mut self, item: T) {
        self.items.push(item);
    }

    /// Remove the item at `index`, if there is one.
    pub fn remove_at(&mut self, index: usize) -> Option<T> {
        if index < self.items.len() {
            Some(self.items.remove(index))
        } else {
            None
        }
    }

    /// Swap the item at `index` with its predecessor. Returns whether anything moved.
    pub fn move_up(&mut self, index: usize) -> bool {
        if index >= 1 && index < self.items.len() {
            self.items.swap(index - 1, index);
            true
        } else {
            false
        }
    }

    /// Swap the item at `index` with its successor. Returns whether anything moved.
    pub fn move_down(&mut self, index: usize) -> bool {
        if index < self.items.len().saturating_sub(1) {
            self.items.swap(index, index + 1);
            true
        } else {
            false
        }
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Entry at `index`.
    pub fn get(&self, index: usize) -> Option<&T> {
        self.items.get(index)
    }

    /// Entries in order.
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Iterate entries in order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the queue has no entries.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T: Clone> OrderedQueue<T> {
    /// Point-in-time ordered copy. Later edits to the queue never reach it.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.clone()
    }
}

impl<T> FromIterator<T> for OrderedQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<T> Extend<T> for OrderedQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        self.items.extend(iter);
    }
}
