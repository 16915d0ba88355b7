/// Fixed-capacity ring buffer. Pushing into a full buffer overwrites the
/// oldest element in O(1).
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    /// Index of the oldest element.
    head: usize,
    len: usize,
    evicted: u64,
}

impl<T> RingBuffer<T> {
    /// A zero capacity is bumped to 1 so the buffer can always hold the latest element.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots,
            head: 0,
            len: 0,
            evicted: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Number of elements overwritten since construction.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Append `value`, returning the evicted oldest element if the buffer was full.
    pub fn push(&mut self, value: T) -> Option<T> {
        let cap = self.capacity();
        if self.len < cap {
            let idx = (self.head + self.len) % cap;
            self.slots[idx] = Some(value);
            self.len += 1;
            None
        } else {
            let old = self.slots[self.head].replace(value);
            self.head = (self.head + 1) % cap;
            self.evicted += 1;
            old
        }
    }

    /// Element `i` in insertion order (0 = oldest).
    pub fn get(&self, i: usize) -> Option<&T> {
        if i >= self.len {
            return None;
        }
        self.slots[(self.head + i) % self.capacity()].as_ref()
    }

    /// Iterate oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter()).filter_map(Option::as_ref)
    }

    /// The newest `n` elements, oldest first.
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &T> + '_ {
        let n = n.min(self.len);
        (self.len - n..self.len).filter_map(move |i| self.get(i))
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Copy out the contents oldest to newest.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_full() {
        let mut rb = RingBuffer::with_capacity(3);
        assert_eq!(rb.push(1), None);
        assert_eq!(rb.push(2), None);
        assert_eq!(rb.push(3), None);
        assert!(rb.is_full());
        assert_eq!(rb.push(4), Some(1));
        assert_eq!(rb.to_vec(), vec![2, 3, 4]);
        assert_eq!(rb.evicted(), 1);
        assert_eq!(rb.len(), 3);
    }

    #[test]
    fn tail_returns_newest_in_order() {
        let mut rb = RingBuffer::with_capacity(4);
        for i in 0..10 {
            rb.push(i);
        }
        let tail: Vec<_> = rb.tail(2).copied().collect();
        assert_eq!(tail, vec![8, 9]);
        let all: Vec<_> = rb.tail(100).copied().collect();
        assert_eq!(all, vec![6, 7, 8, 9]);
    }

    #[test]
    fn zero_capacity_holds_one() {
        let mut rb = RingBuffer::with_capacity(0);
        rb.push("a");
        rb.push("b");
        assert_eq!(rb.to_vec(), vec!["b"]);
    }
}
