use crate::sync::{Condvar, Mutex};
use core::cmp::Ordering;
use core::time::Duration;
use derive_more::Debug;
use std::collections::BinaryHeap;
use std::time::Instant;

/// Thread-safe priority queue keyed on earliest-ready time.
///
/// `push` associates every element with a ready-time of `now + delay`; `pop`
/// and [`pop_wait`](Self::pop_wait) only ever return elements whose
/// ready-time has passed. Among elements with identical ready-times the
/// delivery order is deterministic (insertion order) but not part of the
/// contract.
///
/// All operations are safe under concurrent `push`/`pop`/`pop_wait` from any
/// number of threads.
#[derive(Debug)]
#[must_use]
pub struct DelayQueue<T> {
    #[debug(skip)]
    state: Mutex<QueueState<T>>,
    #[debug(skip)]
    available: Condvar,
}

struct QueueState<T> {
    heap: BinaryHeap<Delayed<T>>,
    next_seq: u64,
}

struct Delayed<T> {
    ready_at: Instant,
    seq: u64,
    value: T,
}

impl<T> PartialEq for Delayed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<T> Eq for Delayed<T> {}

impl<T> PartialOrd for Delayed<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Delayed<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // `BinaryHeap` is a max-heap: reverse both keys so the earliest
        // ready-time (then the earliest insertion) sits at the top.
        other
            .ready_at
            .cmp(&self.ready_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T> DelayQueue<T> {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Inserts `value` with ready-time `now + delay`.
    ///
    /// If the new element becomes the queue's minimum, one waiter is woken so
    /// it can re-evaluate its wait deadline.
    pub fn push(&self, value: T, delay: Duration) {
        let ready_at = Instant::now() + delay;
        let mut state = self.state.lock().expect("DelayQueue::push: poisoned");
        let element = Delayed {
            ready_at,
            seq: state.next_seq,
            value,
        };
        state.next_seq += 1;
        // Wake a waiter only when the head changes: either the queue was
        // empty or the new element is due earlier than the current minimum.
        let notify = state.heap.peek().map_or(true, |head| element > *head);
        state.heap.push(element);
        drop(state);
        if notify {
            self.available.notify_one();
        }
    }

    /// Pops the head if it is due; returns `None` when the queue is empty or
    /// the head's ready-time is still in the future.
    pub fn pop(&self) -> Option<T> {
        let mut state = self.state.lock().expect("DelayQueue::pop: poisoned");
        let due = state
            .heap
            .peek()
            .is_some_and(|head| head.ready_at <= Instant::now());
        if !due {
            return None;
        }
        let head = state.heap.pop().expect("DelayQueue::pop: head vanished");
        if !state.heap.is_empty() {
            self.available.notify_one();
        }
        Some(head.value)
    }

    /// Blocks until the head is due and returns it, or until `timeout`
    /// elapses, in which case `None` is returned.
    ///
    /// The wait re-checks its predicate on every wake-up: a new, earlier
    /// element may have arrived, or the head may have become due by time
    /// alone.
    pub fn pop_wait(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("DelayQueue::pop_wait: poisoned");
        loop {
            let now = Instant::now();
            let wait_until = match state.heap.peek() {
                Some(head) if head.ready_at <= now => {
                    let head = state
                        .heap
                        .pop()
                        .expect("DelayQueue::pop_wait: head vanished");
                    if !state.heap.is_empty() {
                        self.available.notify_one();
                    }
                    return Some(head.value);
                }
                Some(head) => head.ready_at.min(deadline),
                None => deadline,
            };
            if now >= deadline {
                return None;
            }
            let (guard, _timed_out) = self
                .available
                .wait_timeout(state, wait_until - now)
                .expect("DelayQueue::pop_wait: poisoned");
            state = guard;
        }
    }

    /// Number of elements currently queued, due or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().expect("DelayQueue::len: poisoned").heap.len()
    }

    /// Whether the queue holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for DelayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
