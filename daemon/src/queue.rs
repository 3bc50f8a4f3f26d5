use crossbeam_queue::ArrayQueue;

/// Fixed-size descriptor of one received registration signal. Plain `Copy`
/// data so the producing signal handler never touches the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSignal {
    pub signo: i32,
    pub pid: i32,
}

/// Pre-allocated lock-free queue between the signal handler (producer) and
/// the drain thread (consumer).
///
/// All storage is allocated up front; push and pop are atomic operations with
/// bounded work, which keeps the producer side safe to run while interrupting
/// arbitrary other code. When the queue is full, the push is refused and the
/// signal is dropped.
pub struct SignalQueue {
    inner: ArrayQueue<RawSignal>,
}

impl SignalQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: ArrayQueue::new(capacity),
        }
    }

    /// Enqueues a descriptor; `Err` returns it when the queue is full.
    pub fn push(&self, sig: RawSignal) -> Result<(), RawSignal> {
        self.inner.push(sig)
    }

    /// Dequeues the oldest descriptor, if any.
    pub fn pop(&self) -> Option<RawSignal> {
        self.inner.pop()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(signo: i32, pid: i32) -> RawSignal {
        RawSignal { signo, pid }
    }

    // ── push / pop ────────────────────────────────────────────────────────────

    #[test]
    fn pop_returns_in_push_order() {
        let q = SignalQueue::new(8);
        q.push(raw(45, 100)).unwrap();
        q.push(raw(46, 200)).unwrap();
        assert_eq!(q.pop(), Some(raw(45, 100)));
        assert_eq!(q.pop(), Some(raw(46, 200)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn pop_on_empty_returns_none() {
        let q = SignalQueue::new(4);
        assert!(q.is_empty());
        assert_eq!(q.pop(), None);
    }

    // ── capacity ──────────────────────────────────────────────────────────────

    #[test]
    fn push_beyond_capacity_is_refused() {
        let q = SignalQueue::new(2);
        q.push(raw(45, 1)).unwrap();
        q.push(raw(45, 2)).unwrap();
        // Third push is refused and hands the descriptor back.
        assert_eq!(q.push(raw(45, 3)), Err(raw(45, 3)));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn capacity_matches_construction() {
        let q = SignalQueue::new(64);
        assert_eq!(q.capacity(), 64);
    }

    #[test]
    fn refused_push_does_not_corrupt_order() {
        let q = SignalQueue::new(1);
        q.push(raw(47, 7)).unwrap();
        let _ = q.push(raw(47, 8));
        assert_eq!(q.pop(), Some(raw(47, 7)));
        assert_eq!(q.pop(), None);
    }
}
