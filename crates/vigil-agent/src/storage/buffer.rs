//! Fixed-capacity circular buffer of snapshots

/// Ring buffer holding the `capacity` most recently added items.
///
/// Storage is allocated once at construction and never grows; once full,
/// each insert overwrites the oldest item.
#[derive(Debug, Clone)]
pub struct StatsBuffer<T> {
    buffer: Vec<T>,
    capacity: usize,
    /// Slot holding the newest item
    head: usize,
}

impl<T: Clone> StatsBuffer<T> {
    /// Create a buffer for `capacity` items (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: Vec::with_capacity(capacity),
            capacity,
            head: capacity - 1,
        }
    }

    /// Store `item`, evicting the oldest item when full
    pub fn add(&mut self, item: T) {
        self.head = (self.head + 1) % self.capacity;
        if self.buffer.len() < self.capacity {
            self.buffer.push(item);
        } else {
            self.buffer[self.head] = item;
        }
    }

    /// The `min(n, size)` newest items, oldest first, copied out
    pub fn first_n(&self, n: usize) -> Vec<T> {
        let n = n.min(self.size());
        if n == 0 {
            return Vec::new();
        }
        // head points at the newest item; walk back n-1 slots, wrapping past 0
        let start = (self.head + self.capacity - (n - 1)) % self.capacity;
        (0..n)
            .map(|i| self.buffer[(start + i) % self.capacity].clone())
            .collect()
    }

    /// Number of items currently held, 0..=capacity
    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
