// Bounded in-memory metric history
// One fixed-capacity ring buffer per metric kind, each behind its own mutex

use super::metrics::{AccuracyMetric, ExperienceMetric, MetricKind, MetricRecord, PerformanceMetric};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Fixed-capacity FIFO that overwrites its oldest entry when full
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, returning the evicted entry if the buffer was full
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
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

    /// Oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    /// Keep only entries matching `keep`, returning how many were dropped
    pub fn retain<F: FnMut(&T) -> bool>(&mut self, keep: F) -> usize {
        let before = self.items.len();
        self.items.retain(keep);
        before - self.items.len()
    }
}

/// Lock, recovering the guard if a writer panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// `now - span`, clamped to the earliest representable instant
pub(crate) fn cutoff_before(now: DateTime<Utc>, span: chrono::Duration) -> DateTime<Utc> {
    now.checked_sub_signed(span).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Buffer length and lifetime append count per kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub accuracy_len: usize,
    pub performance_len: usize,
    pub experience_len: usize,
    pub accuracy_total: u64,
    pub performance_total: u64,
    pub experience_total: u64,
}

impl StoreStats {
    pub fn len(&self, kind: MetricKind) -> usize {
        match kind {
            MetricKind::Accuracy => self.accuracy_len,
            MetricKind::Performance => self.performance_len,
            MetricKind::Experience => self.experience_len,
        }
    }

    pub fn total(&self, kind: MetricKind) -> u64 {
        match kind {
            MetricKind::Accuracy => self.accuracy_total,
            MetricKind::Performance => self.performance_total,
            MetricKind::Experience => self.experience_total,
        }
    }
}

/// Thread-safe rolling history of accuracy, performance and experience records.
///
/// Every read copies under the same lock used for append, so callers never
/// observe a partially written record.
#[derive(Debug)]
pub struct MetricStore {
    accuracy: Mutex<RingBuffer<AccuracyMetric>>,
    performance: Mutex<RingBuffer<PerformanceMetric>>,
    experience: Mutex<RingBuffer<ExperienceMetric>>,
    accuracy_total: AtomicU64,
    performance_total: AtomicU64,
    experience_total: AtomicU64,
}

impl MetricStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            accuracy: Mutex::new(RingBuffer::new(capacity)),
            performance: Mutex::new(RingBuffer::new(capacity)),
            experience: Mutex::new(RingBuffer::new(capacity)),
            accuracy_total: AtomicU64::new(0),
            performance_total: AtomicU64::new(0),
            experience_total: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        lock(&self.accuracy).capacity()
    }

    pub fn append(&self, record: MetricRecord) {
        match record {
            MetricRecord::Accuracy(m) => self.append_accuracy(m),
            MetricRecord::Performance(m) => self.append_performance(m),
            MetricRecord::Experience(m) => self.append_experience(m),
        }
    }

    pub fn append_accuracy(&self, metric: AccuracyMetric) {
        lock(&self.accuracy).push(metric);
        self.accuracy_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn append_performance(&self, metric: PerformanceMetric) {
        lock(&self.performance).push(metric);
        self.performance_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn append_experience(&self, metric: ExperienceMetric) {
        lock(&self.experience).push(metric);
        self.experience_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy of one kind's buffer, oldest first, optionally limited to `timestamp >= since`
    pub fn snapshot(&self, kind: MetricKind, since: Option<DateTime<Utc>>) -> Vec<MetricRecord> {
        match kind {
            MetricKind::Accuracy => self
                .accuracy_since(since)
                .into_iter()
                .map(MetricRecord::Accuracy)
                .collect(),
            MetricKind::Performance => self
                .performance_since(since)
                .into_iter()
                .map(MetricRecord::Performance)
                .collect(),
            MetricKind::Experience => self
                .experience_since(since)
                .into_iter()
                .map(MetricRecord::Experience)
                .collect(),
        }
    }

    pub fn accuracy_since(&self, since: Option<DateTime<Utc>>) -> Vec<AccuracyMetric> {
        copy_since(&lock(&self.accuracy), since, |m| m.timestamp)
    }

    pub fn performance_since(&self, since: Option<DateTime<Utc>>) -> Vec<PerformanceMetric> {
        copy_since(&lock(&self.performance), since, |m| m.timestamp)
    }

    pub fn experience_since(&self, since: Option<DateTime<Utc>>) -> Vec<ExperienceMetric> {
        copy_since(&lock(&self.experience), since, |m| m.timestamp)
    }

    /// Most recent `limit` records of one kind, oldest first
    pub fn accuracy_recent(&self, limit: usize) -> Vec<AccuracyMetric> {
        copy_recent(&lock(&self.accuracy), limit)
    }

    pub fn performance_recent(&self, limit: usize) -> Vec<PerformanceMetric> {
        copy_recent(&lock(&self.performance), limit)
    }

    pub fn experience_recent(&self, limit: usize) -> Vec<ExperienceMetric> {
        copy_recent(&lock(&self.experience), limit)
    }

    pub fn len(&self, kind: MetricKind) -> usize {
        match kind {
            MetricKind::Accuracy => lock(&self.accuracy).len(),
            MetricKind::Performance => lock(&self.performance).len(),
            MetricKind::Experience => lock(&self.experience).len(),
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            accuracy_len: self.len(MetricKind::Accuracy),
            performance_len: self.len(MetricKind::Performance),
            experience_len: self.len(MetricKind::Experience),
            accuracy_total: self.accuracy_total.load(Ordering::Relaxed),
            performance_total: self.performance_total.load(Ordering::Relaxed),
            experience_total: self.experience_total.load(Ordering::Relaxed),
        }
    }

    /// Drop every record stamped at or before `cutoff`; returns how many were removed
    pub fn evict_before(&self, cutoff: DateTime<Utc>) -> usize {
        lock(&self.accuracy).retain(|m| m.timestamp > cutoff)
            + lock(&self.performance).retain(|m| m.timestamp > cutoff)
            + lock(&self.experience).retain(|m| m.timestamp > cutoff)
    }
}

fn copy_since<T: Clone>(
    buffer: &RingBuffer<T>,
    since: Option<DateTime<Utc>>,
    timestamp: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    match since {
        // Arrival order is not timestamp order, so filter the whole buffer
        Some(since) => buffer
            .iter()
            .filter(|item| timestamp(*item) >= since)
            .cloned()
            .collect(),
        None => buffer.iter().cloned().collect(),
    }
}

fn copy_recent<T: Clone>(buffer: &RingBuffer<T>, limit: usize) -> Vec<T> {
    let skip = buffer.len().saturating_sub(limit);
    buffer.iter().skip(skip).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::metrics::{ExperienceSample, PerformanceSample, ResourceUsage};
    use chrono::Duration;

    fn perf(latency_ms: f64, at: DateTime<Utc>) -> PerformanceMetric {
        PerformanceMetric::from_sample(
            PerformanceSample::new("geo", "/locate", latency_ms, 200),
            ResourceUsage::default(),
            at,
        )
        .unwrap()
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut ring = RingBuffer::new(3);
        assert_eq!(ring.push(1), None);
        assert_eq!(ring.push(2), None);
        assert_eq!(ring.push(3), None);
        assert_eq!(ring.push(4), Some(1));
        assert_eq!(ring.iter().copied().collect::<Vec<_>>(), vec![2, 3, 4]);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_ring_buffer_zero_capacity_is_clamped() {
        let mut ring = RingBuffer::new(0);
        ring.push("a");
        ring.push("b");
        assert_eq!(ring.len(), 1);
        assert_eq!(ring.iter().next(), Some(&"b"));
    }

    #[test]
    fn test_store_keeps_most_recent() {
        let store = MetricStore::new(5);
        let now = Utc::now();
        for i in 0..12 {
            store.append_performance(perf(i as f64, now));
        }

        let latencies: Vec<f64> = store
            .performance_since(None)
            .iter()
            .map(|m| m.latency_ms)
            .collect();
        assert_eq!(latencies, vec![7.0, 8.0, 9.0, 10.0, 11.0]);
        assert_eq!(store.stats().performance_total, 12);
        assert_eq!(store.stats().performance_len, 5);
    }

    #[test]
    fn test_snapshot_since_filters_out_of_order_arrivals() {
        let store = MetricStore::new(10);
        let now = Utc::now();
        store.append_performance(perf(1.0, now));
        store.append_performance(perf(2.0, now - Duration::hours(2)));
        store.append_performance(perf(3.0, now));

        let recent = store.snapshot(MetricKind::Performance, Some(now - Duration::minutes(5)));
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|r| r.kind() == MetricKind::Performance));
    }

    #[test]
    fn test_recent_limit() {
        let store = MetricStore::new(100);
        let now = Utc::now();
        for i in 0..20 {
            store.append_performance(perf(i as f64, now));
        }
        let last = store.performance_recent(10);
        assert_eq!(last.len(), 10);
        assert_eq!(last[0].latency_ms, 10.0);
        assert_eq!(last[9].latency_ms, 19.0);
        assert_eq!(store.performance_recent(50).len(), 20);
    }

    #[test]
    fn test_evict_before() {
        let store = MetricStore::new(10);
        let now = Utc::now();
        store.append_performance(perf(1.0, now - Duration::days(40)));
        store.append_performance(perf(2.0, now));
        store.append_experience(
            ExperienceMetric::from_sample(
                ExperienceSample::new("u", "s", "search", true, 5.0),
                now - Duration::days(31),
            )
            .unwrap(),
        );

        let removed = store.evict_before(now - Duration::days(30));
        assert_eq!(removed, 2);
        assert_eq!(store.len(MetricKind::Performance), 1);
        assert_eq!(store.len(MetricKind::Experience), 0);
    }
}
