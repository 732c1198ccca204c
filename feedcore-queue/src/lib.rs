//! Bounded, thread-safe priority queue with content-hash deduplication.
//!
//! Three FIFO sub-queues (one per [`Priority`]) share a single capacity `C`.
//! A HIGH-priority enqueue on a full queue displaces the oldest LOW entry
//! (or, failing that, the oldest NORMAL entry) rather than being rejected.
//! A time-windowed dedup index prevents the same content from being
//! enqueued twice within `dedup_window`.

mod hash;

pub use hash::{content_hash, ContentHash};

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use feedcore_common::{Clock, Item, Priority, SystemClock};
use parking_lot::Mutex;

/// Default window, in seconds, over which identical content is suppressed.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(3600);

/// An [`Item`] wrapped with priority and bookkeeping fields, owned by the
/// queue once enqueued.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub item: Item,
    pub priority: Priority,
    pub enqueued_at: Instant,
    pub retry_count: u32,
    pub content_hash: ContentHash,
}

impl QueueItem {
    fn new(item: Item, priority: Priority, content_hash: ContentHash, now: Instant) -> Self {
        Self {
            item,
            priority,
            enqueued_at: now,
            retry_count: 0,
            content_hash,
        }
    }
}

/// Why an `enqueue` call was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The content hash was seen within the dedup window.
    Duplicate,
    /// The queue was full and the item's priority didn't qualify for
    /// displacement.
    Overflow,
}

/// Outcome of an `enqueue` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    Rejected(RejectReason),
}

impl EnqueueOutcome {
    /// Collapse the outcome to a `bool`: `true` iff the item is now in the
    /// queue.
    #[must_use]
    pub const fn is_enqueued(self) -> bool {
        matches!(self, Self::Enqueued)
    }
}

fn priority_index(priority: Priority) -> usize {
    match priority {
        Priority::Low => 0,
        Priority::Normal => 1,
        Priority::High => 2,
    }
}

struct Inner {
    queues: [VecDeque<QueueItem>; 3],
    dedup: HashMap<ContentHash, Instant>,
}

impl Inner {
    fn total_size(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    fn prune_dedup(&mut self, now: Instant, window: Duration) {
        self.dedup.retain(|_, &mut seen_at| now.duration_since(seen_at) < window);
    }
}

/// Overflow counters, one per priority, for the `queue_overflows{priority}`
/// metric.
#[derive(Debug, Default)]
pub struct OverflowCounters {
    low: AtomicU64,
    normal: AtomicU64,
    high: AtomicU64,
}

impl OverflowCounters {
    fn counter(&self, priority: Priority) -> &AtomicU64 {
        match priority {
            Priority::Low => &self.low,
            Priority::Normal => &self.normal,
            Priority::High => &self.high,
        }
    }

    fn increment(&self, priority: Priority) {
        self.counter(priority).fetch_add(1, Ordering::Relaxed);
    }

    /// Current overflow count for `priority`.
    #[must_use]
    pub fn get(&self, priority: Priority) -> u64 {
        self.counter(priority).load(Ordering::Relaxed)
    }
}

/// Bounded, thread-safe, three-level priority queue with content-hash
/// deduplication over a sliding time window.
pub struct PriorityQueue<C: Clock = SystemClock> {
    capacity: usize,
    dedup_window: Duration,
    inner: Mutex<Inner>,
    overflows: OverflowCounters,
    clock: Arc<C>,
}

impl PriorityQueue<SystemClock> {
    /// Create a queue bounded at `capacity` with the default dedup window
    /// (1 hour), backed by the real system clock.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, DEFAULT_DEDUP_WINDOW, Arc::new(SystemClock))
    }

    /// Create a queue with an explicit dedup window.
    #[must_use]
    pub fn with_dedup_window(capacity: usize, dedup_window: Duration) -> Self {
        Self::with_clock(capacity, dedup_window, Arc::new(SystemClock))
    }
}

impl<C: Clock> PriorityQueue<C> {
    /// Create a queue with an injected clock, for deterministic tests of
    /// dedup-window and age-based behavior.
    #[must_use]
    pub fn with_clock(capacity: usize, dedup_window: Duration, clock: Arc<C>) -> Self {
        Self {
            capacity,
            dedup_window,
            inner: Mutex::new(Inner {
                queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                dedup: HashMap::new(),
            }),
            overflows: OverflowCounters::default(),
            clock,
        }
    }

    /// Configured capacity `C`.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Overflow counters, labeled by priority.
    #[must_use]
    pub const fn overflows(&self) -> &OverflowCounters {
        &self.overflows
    }

    /// Attempt to enqueue `item` at `priority`. See module docs for
    /// displacement and dedup semantics.
    pub fn enqueue(&self, item: Item, priority: Priority) -> EnqueueOutcome {
        let now = self.clock.now();
        let hash = content_hash(&item);

        let mut inner = self.inner.lock();
        inner.prune_dedup(now, self.dedup_window);

        if inner.dedup.contains_key(&hash) {
            return EnqueueOutcome::Rejected(RejectReason::Duplicate);
        }

        self.insert(&mut inner, QueueItem::new(item, priority, hash, now))
    }

    /// Re-enqueue a previously-dequeued `item`, typically at a lower
    /// priority and with `retry_count` already incremented by the caller.
    /// Unlike [`Self::enqueue`], this bypasses the dedup check: the item
    /// was already admitted once, and putting it back after a failed
    /// delivery attempt is not a duplicate submission. Capacity and
    /// HIGH-displacement rules still apply.
    pub fn requeue(&self, mut item: QueueItem, priority: Priority) -> EnqueueOutcome {
        let now = self.clock.now();
        item.priority = priority;
        item.enqueued_at = now;

        let mut inner = self.inner.lock();
        inner.prune_dedup(now, self.dedup_window);

        self.insert(&mut inner, item)
    }

    fn insert(&self, inner: &mut Inner, item: QueueItem) -> EnqueueOutcome {
        let priority = item.priority;
        let hash = item.content_hash;
        let total = inner.total_size();

        if total < self.capacity {
            inner.dedup.insert(hash, item.enqueued_at);
            inner.queues[priority_index(priority)].push_back(item);
            return EnqueueOutcome::Enqueued;
        }

        if priority == Priority::High {
            let displaced = if !inner.queues[priority_index(Priority::Low)].is_empty() {
                inner.queues[priority_index(Priority::Low)].pop_front()
            } else if !inner.queues[priority_index(Priority::Normal)].is_empty() {
                inner.queues[priority_index(Priority::Normal)].pop_front()
            } else {
                None
            };

            if let Some(displaced) = displaced {
                tracing::debug!(
                    displaced_priority = %displaced.priority,
                    "priority queue full; displacing lower-priority item for HIGH"
                );
                inner.dedup.insert(hash, item.enqueued_at);
                inner.queues[priority_index(Priority::High)].push_back(item);
                return EnqueueOutcome::Enqueued;
            }
        }

        self.overflows.increment(priority);
        EnqueueOutcome::Rejected(RejectReason::Overflow)
    }

    /// Dequeue the head of HIGH, then NORMAL, then LOW. FIFO within a
    /// priority level.
    pub fn dequeue(&self) -> Option<QueueItem> {
        let mut inner = self.inner.lock();
        for idx in [
            priority_index(Priority::High),
            priority_index(Priority::Normal),
            priority_index(Priority::Low),
        ] {
            if let Some(item) = inner.queues[idx].pop_front() {
                return Some(item);
            }
        }
        None
    }

    /// Peek at the item `dequeue` would return next, without removing it.
    #[must_use]
    pub fn peek(&self) -> Option<QueueItem> {
        let inner = self.inner.lock();
        for idx in [
            priority_index(Priority::High),
            priority_index(Priority::Normal),
            priority_index(Priority::Low),
        ] {
            if let Some(item) = inner.queues[idx].front() {
                return Some(item.clone());
            }
        }
        None
    }

    /// Total number of items across all priorities.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.lock().total_size()
    }

    /// Number of items at a specific priority, for the `queue_size{priority}`
    /// metric.
    #[must_use]
    pub fn size_at(&self, priority: Priority) -> usize {
        self.inner.lock().queues[priority_index(priority)].len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.size() >= self.capacity
    }

    /// Evict items enqueued before `cutoff`. Returns the number evicted.
    /// Used by retention cleanup; does not touch the dedup index, so a
    /// previously-evicted hash still suppresses re-enqueue until its window
    /// expires.
    pub fn clear_older_than(&self, cutoff: Instant) -> usize {
        let mut inner = self.inner.lock();
        let mut evicted = 0;
        for queue in &mut inner.queues {
            let before = queue.len();
            queue.retain(|qi| qi.enqueued_at >= cutoff);
            evicted += before - queue.len();
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use feedcore_common::FakeClock;

    fn item(source_id: &str) -> Item {
        Item {
            source_id: source_id.to_string(),
            title: "title".to_string(),
            brief: "brief".to_string(),
            url: "https://example.com/a".to_string(),
            published_at: Utc::now(),
            author: None,
            tags: vec![],
            signals: serde_json::Map::new(),
        }
    }

    #[test]
    fn scenario_a_priority_displacement() {
        let queue = PriorityQueue::new(2);

        assert!(queue.enqueue(item("L1"), Priority::Low).is_enqueued());
        assert!(queue.enqueue(item("N1"), Priority::Normal).is_enqueued());
        assert!(queue.enqueue(item("H1"), Priority::High).is_enqueued());

        assert_eq!(queue.size(), 2);
        let first = queue.dequeue().unwrap();
        assert_eq!(first.item.source_id, "H1");
        let second = queue.dequeue().unwrap();
        assert_eq!(second.item.source_id, "N1");
        assert!(queue.is_empty());
    }

    #[test]
    fn non_high_enqueue_on_full_queue_rejected() {
        let queue = PriorityQueue::new(1);
        assert!(queue.enqueue(item("A"), Priority::Normal).is_enqueued());
        let outcome = queue.enqueue(item("B"), Priority::Normal);
        assert_eq!(outcome, EnqueueOutcome::Rejected(RejectReason::Overflow));
        assert_eq!(queue.overflows().get(Priority::Normal), 1);
    }

    #[test]
    fn high_enqueue_on_full_queue_with_no_displaceable_item_rejected() {
        let queue = PriorityQueue::new(1);
        assert!(queue.enqueue(item("A"), Priority::High).is_enqueued());
        let outcome = queue.enqueue(item("B"), Priority::High);
        assert_eq!(outcome, EnqueueOutcome::Rejected(RejectReason::Overflow));
    }

    #[test]
    fn fifo_within_priority() {
        let queue = PriorityQueue::new(10);
        queue.enqueue(item("A"), Priority::Normal);
        queue.enqueue(item("B"), Priority::Normal);
        assert_eq!(queue.dequeue().unwrap().item.source_id, "A");
        assert_eq!(queue.dequeue().unwrap().item.source_id, "B");
    }

    #[test]
    fn strict_priority_over_fifo() {
        let queue = PriorityQueue::new(10);
        queue.enqueue(item("low"), Priority::Low);
        queue.enqueue(item("high"), Priority::High);
        assert_eq!(queue.dequeue().unwrap().item.source_id, "high");
    }

    #[test]
    fn scenario_b_dedup_window() {
        let clock = Arc::new(FakeClock::new());
        let queue = PriorityQueue::with_clock(10, Duration::from_secs(60), clock.clone());

        let it = item("X");
        assert!(queue
            .enqueue(it.clone(), Priority::Normal)
            .is_enqueued());

        clock.advance(Duration::from_secs(10));
        let outcome = queue.enqueue(it.clone(), Priority::Normal);
        assert_eq!(outcome, EnqueueOutcome::Rejected(RejectReason::Duplicate));
        assert_eq!(queue.size(), 1);

        clock.advance(Duration::from_secs(51));
        assert!(queue.enqueue(it, Priority::Normal).is_enqueued());
        assert_eq!(queue.size(), 2);
    }

    #[test]
    fn capacity_never_exceeded() {
        let queue = PriorityQueue::new(3);
        for i in 0..10 {
            queue.enqueue(item(&format!("item-{i}")), Priority::High);
            assert!(queue.size() <= 3);
        }
    }

    #[test]
    fn displaced_item_never_resurfaces() {
        let queue = PriorityQueue::new(1);
        queue.enqueue(item("L1"), Priority::Low);
        queue.enqueue(item("H1"), Priority::High);

        let mut seen = vec![];
        while let Some(qi) = queue.dequeue() {
            seen.push(qi.item.source_id);
        }
        assert_eq!(seen, vec!["H1"]);
    }

    #[test]
    fn requeue_bypasses_dedup_and_preserves_retry_count() {
        let queue = PriorityQueue::new(10);
        queue.enqueue(item("A"), Priority::Normal);
        let mut dequeued = queue.dequeue().unwrap();
        dequeued.retry_count += 1;

        let outcome = queue.requeue(dequeued, Priority::Low);
        assert!(outcome.is_enqueued());

        let requeued = queue.dequeue().unwrap();
        assert_eq!(requeued.item.source_id, "A");
        assert_eq!(requeued.retry_count, 1);
        assert_eq!(requeued.priority, Priority::Low);
    }

    #[test]
    fn clear_older_than_evicts_stale_items() {
        let clock = Arc::new(FakeClock::new());
        let queue = PriorityQueue::with_clock(10, DEFAULT_DEDUP_WINDOW, clock.clone());

        queue.enqueue(item("old"), Priority::Normal);
        clock.advance(Duration::from_secs(30));
        let cutoff = clock.now();
        clock.advance(Duration::from_secs(30));
        queue.enqueue(item("new"), Priority::Normal);

        let evicted = queue.clear_older_than(cutoff);
        assert_eq!(evicted, 1);
        assert_eq!(queue.size(), 1);
        assert_eq!(queue.dequeue().unwrap().item.source_id, "new");
    }
}
