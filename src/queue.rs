//! Bounded priority queue over `(u64, u64)` pairs

/// Keeps the `capacity` best `(element1, element2, priority)` triples.
///
/// Entries live in three parallel vectors sorted by ascending internal
/// priority, so the worst entry is always the last one. The max variant
/// negates priorities on the way in and out and reuses the same logic.
///
/// Ties keep insertion order: a new entry goes behind existing entries with
/// the same priority, and an offer equal to the worst entry of a full queue
/// is rejected. `NaN` priorities are never stored.
#[derive(Debug, Clone)]
pub struct BoundedLongLongPriorityQueue {
    capacity: usize,
    sign: f64,
    elements1: Vec<u64>,
    elements2: Vec<u64>,
    priorities: Vec<f64>,
}

impl BoundedLongLongPriorityQueue {
    /// Queue keeping the smallest priorities
    pub fn min(capacity: usize) -> Self {
        Self::with_sign(capacity, 1.0)
    }

    /// Queue keeping the largest priorities
    pub fn max(capacity: usize) -> Self {
        Self::with_sign(capacity, -1.0)
    }

    fn with_sign(capacity: usize, sign: f64) -> Self {
        Self {
            capacity,
            sign,
            elements1: Vec::with_capacity(capacity),
            elements2: Vec::with_capacity(capacity),
            priorities: Vec::with_capacity(capacity),
        }
    }

    /// Insert the triple if it ranks among the best seen so far; returns whether it was kept
    pub fn offer(&mut self, element1: u64, element2: u64, priority: f64) -> bool {
        if self.capacity == 0 || priority.is_nan() {
            return false;
        }
        let priority = priority * self.sign;

        if self.priorities.len() == self.capacity {
            match self.priorities.last() {
                Some(&worst) if priority >= worst => return false,
                _ => {}
            }
            self.elements1.pop();
            self.elements2.pop();
            self.priorities.pop();
        }

        let index = self.priorities.partition_point(|&existing| existing <= priority);
        self.elements1.insert(index, element1);
        self.elements2.insert(index, element2);
        self.priorities.insert(index, priority);
        true
    }

    pub fn size(&self) -> usize {
        self.priorities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.priorities.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// First elements, best first
    pub fn elements1(&self) -> &[u64] {
        &self.elements1
    }

    /// Second elements, best first
    pub fn elements2(&self) -> &[u64] {
        &self.elements2
    }

    /// Priorities as offered, best first
    pub fn priorities(&self) -> impl Iterator<Item = f64> + '_ {
        self.priorities.iter().map(move |&priority| priority * self.sign)
    }

    /// `(element1, element2, priority)` triples, best first
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64, f64)> + '_ {
        self.elements1
            .iter()
            .zip(&self.elements2)
            .zip(self.priorities())
            .map(|((&element1, &element2), priority)| (element1, element2, priority))
    }

    /// Offer every entry of `other`, keeping its best-first order for ties
    pub fn merge(&mut self, other: &BoundedLongLongPriorityQueue) {
        for (element1, element2, priority) in other.iter() {
            self.offer(element1, element2, priority);
        }
    }
}
