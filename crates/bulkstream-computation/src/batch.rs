//! Size and time bounded buffering.
//!
//! Writers that trade latency for throughput buffer items and flush on
//! whichever threshold is hit first: the buffer reaching `batch_size`, or
//! `batch_threshold_ms` elapsing since the last flush.

/// When a [`BatchBuffer`] should be flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    pub batch_size: usize,
    pub batch_threshold_ms: u64,
}

impl FlushPolicy {
    pub fn new(batch_size: usize, batch_threshold_ms: u64) -> Self {
        Self {
            batch_size: batch_size.max(1),
            batch_threshold_ms,
        }
    }
}

/// Buffer of pending items plus the time of the last flush.
#[derive(Debug, Clone)]
pub struct BatchBuffer<T> {
    policy: FlushPolicy,
    items: Vec<T>,
    last_flush_ms: u64,
}

impl<T> BatchBuffer<T> {
    pub fn new(policy: FlushPolicy, now_ms: u64) -> Self {
        Self {
            policy,
            items: Vec::with_capacity(policy.batch_size),
            last_flush_ms: now_ms,
        }
    }

    pub fn policy(&self) -> FlushPolicy {
        self.policy
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.policy.batch_size
    }

    /// True when the threshold elapsed since the last flush and there is
    /// something to flush.
    pub fn is_due(&self, now_ms: u64) -> bool {
        !self.items.is_empty() && now_ms >= self.next_deadline()
    }

    /// When the time threshold is next reached.
    pub fn next_deadline(&self) -> u64 {
        self.last_flush_ms.saturating_add(self.policy.batch_threshold_ms)
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Takes the buffered items and restarts the time window at `now_ms`.
    pub fn drain(&mut self, now_ms: u64) -> Vec<T> {
        self.last_flush_ms = now_ms;
        std::mem::replace(&mut self.items, Vec::with_capacity(self.policy.batch_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_at_batch_size() {
        let mut buffer = BatchBuffer::new(FlushPolicy::new(3, 200), 0);
        buffer.push(1);
        buffer.push(2);
        assert!(!buffer.is_full());
        buffer.push(3);
        assert!(buffer.is_full());
    }

    #[test]
    fn due_only_with_items_after_threshold() {
        let mut buffer = BatchBuffer::new(FlushPolicy::new(10, 200), 1_000);
        assert!(!buffer.is_due(5_000));

        buffer.push("a");
        assert!(!buffer.is_due(1_199));
        assert!(buffer.is_due(1_200));
    }

    #[test]
    fn drain_resets_window() {
        let mut buffer = BatchBuffer::new(FlushPolicy::new(10, 200), 0);
        buffer.push('x');
        buffer.push('y');

        assert_eq!(buffer.drain(500), vec!['x', 'y']);
        assert!(buffer.is_empty());
        assert_eq!(buffer.next_deadline(), 700);
    }
}
