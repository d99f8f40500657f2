// Growable array and LIFO stack with explicit capacity control.
//
// Both containers keep their storage across `clear()` so per-frame users
// (profiler entries, pass lists, parent-index stack) never reallocate once
// warmed up.

use std::ops::{Index, IndexMut};

// ============================================================================
// GROWABLE ARRAY
// ============================================================================

/// Contiguous sequence with 1.5x amortised growth.
///
/// `capacity` is tracked explicitly rather than read back from the backing
/// `Vec`, so growth follows `max(capacity + capacity / 2, requested)` exactly.
#[derive(Debug, Clone)]
pub struct GrowableArray<T> {
    items: Vec<T>,
    capacity: usize,
}

impl<T> GrowableArray<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Adopt an already-filled buffer without copying it.
    /// The adopted length becomes both size and capacity.
    pub fn from_vec(items: Vec<T>) -> Self {
        let capacity = items.len();
        Self { items, capacity }
    }

    pub fn add(&mut self, item: T) {
        self.ensure_capacity(self.items.len() + 1);
        self.items.push(item);
    }

    /// Remove and return the last element, if any.
    pub fn remove_last(&mut self) -> Option<T> {
        self.items.pop()
    }

    /// O(1); keeps the allocation.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn ensure_capacity(&mut self, requested: usize) {
        if requested <= self.capacity {
            return;
        }
        let new_capacity = (self.capacity + self.capacity / 2).max(requested);
        self.items.reserve_exact(new_capacity - self.items.len());
        self.capacity = new_capacity;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T> Default for GrowableArray<T> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<T> Index<usize> for GrowableArray<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        &self.items[index]
    }
}

impl<T> IndexMut<usize> for GrowableArray<T> {
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut self.items[index]
    }
}

impl<'a, T> IntoIterator for &'a GrowableArray<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

// ============================================================================
// STACK
// ============================================================================

/// LIFO specialisation of [`GrowableArray`].
#[derive(Debug, Clone, Default)]
pub struct Stack<T> {
    items: GrowableArray<T>,
}

impl<T> Stack<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: GrowableArray::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.add(item);
    }

    /// Panics on an empty stack.
    pub fn pop(&mut self) -> T {
        match self.items.remove_last() {
            Some(item) => item,
            None => panic!("pop on empty stack"),
        }
    }

    /// Panics on an empty stack.
    pub fn peek(&self) -> &T {
        match self.items.last() {
            Some(item) => item,
            None => panic!("peek on empty stack"),
        }
    }

    /// Non-fatal peek: `None` when empty.
    pub fn try_peek(&self) -> Option<&T> {
        self.items.last()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.items.capacity()
    }
}
