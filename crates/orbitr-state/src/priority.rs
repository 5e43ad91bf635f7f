//! Bounded priority queue for event ingestion.
//!
//! Priority 1 is the most urgent. Events of equal priority are served in
//! arrival order. When the queue is full, a new event evicts the current
//! worst entry only if it is strictly more urgent; otherwise it is dropped.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use orbitr_protocol::{now_unix, Severity, StandardizedEvent};

pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Dynamic priority for an event (1..=4, lower is more urgent).
///
/// Starts from the severity and is boosted one level for security-flavoured
/// event types and one more for anything touching production.
pub fn prioritize(event: &StandardizedEvent) -> u8 {
    let mut priority = event.severity.priority();

    let event_type = event.event_type_lower();
    if ["security", "breach", "unauthorized"].iter().any(|kw| event_type.contains(kw)) {
        priority = priority.saturating_sub(1).max(1);
    }

    let payload = event.payload_text();
    if ["prod", "production", "live"].iter().any(|kw| payload.contains(kw)) {
        priority = priority.saturating_sub(1).max(1);
    }

    priority
}

fn priority_name(priority: u8) -> &'static str {
    match priority {
        1 => Severity::Critical.as_str(),
        2 => Severity::High.as_str(),
        4 => Severity::Low.as_str(),
        _ => Severity::Medium.as_str(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub priority: u8,
    pub enqueued_at: f64,
    pub event: StandardizedEvent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub processed: u64,
    pub dropped: u64,
    pub current_size: usize,
    pub max_size: usize,
}

struct QueueInner {
    /// Keyed by (priority, arrival sequence): first entry is the next to serve.
    entries: BTreeMap<(u8, u64), QueuedEvent>,
    next_seq: u64,
    stats: QueueStats,
}

/// Thread-safe bounded priority queue.
pub struct EventQueue {
    inner: Mutex<QueueInner>,
    max_size: usize,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl EventQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                entries: BTreeMap::new(),
                next_seq: 0,
                stats: QueueStats { max_size, ..Default::default() },
            }),
            max_size,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner> {
        // Mutations are single map operations, so a poisoned guard is still consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an event. Returns the assigned priority, or `None` if dropped.
    pub fn enqueue(&self, event: StandardizedEvent) -> Option<u8> {
        let priority = prioritize(&event);
        let mut inner = self.lock();

        if inner.entries.len() >= self.max_size {
            let worst = inner.entries.keys().next_back().copied();
            match worst {
                Some(key) if priority < key.0 => {
                    inner.entries.remove(&key);
                    inner.stats.dropped += 1;
                    tracing::warn!(evicted_priority = key.0, priority, "Queue full, evicted lower-priority event");
                }
                _ => {
                    inner.stats.dropped += 1;
                    tracing::warn!(priority, event_id = %event.event_id, "Queue full, dropped event");
                    return None;
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            (priority, seq),
            QueuedEvent { priority, enqueued_at: now_unix(), event },
        );
        inner.stats.enqueued += 1;
        Some(priority)
    }

    /// Remove and return the most urgent event.
    pub fn dequeue(&self) -> Option<QueuedEvent> {
        let mut inner = self.lock();
        let (_, item) = inner.entries.pop_first()?;
        inner.stats.processed += 1;
        Some(item)
    }

    pub fn peek(&self) -> Option<QueuedEvent> {
        self.lock().entries.values().next().cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.lock();
        QueueStats { current_size: inner.entries.len(), ..inner.stats }
    }

    /// Queued event counts keyed by priority name.
    pub fn by_priority(&self) -> HashMap<&'static str, usize> {
        let inner = self.lock();
        let mut counts: HashMap<&'static str, usize> =
            Severity::ALL.iter().map(|s| (s.as_str(), 0)).collect();
        for (priority, _) in inner.entries.keys() {
            *counts.entry(priority_name(*priority)).or_insert(0) += 1;
        }
        counts
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}
