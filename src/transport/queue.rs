//! Bounded in-memory queue of reports that could not be delivered.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::payload::DetectionResult;

#[derive(Clone, Debug)]
pub struct PendingEntry {
    pub id: u64,
    pub enqueued_at: Instant,
    pub result: DetectionResult,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<PendingEntry>,
    next_id: u64,
    dropped_total: u64,
    dropped_unreported: u64,
}

/// FIFO of failed reports.
///
/// Oldest entries are evicted once `capacity` is reached and expire after `max_age`.
/// Every drop is counted so the next heartbeat can report it.
pub struct PendingReports {
    state: Mutex<QueueState>,
    capacity: usize,
    max_age: Duration,
}

impl PendingReports {
    pub fn new(capacity: usize, max_age: Duration) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            capacity: capacity.max(1),
            max_age,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a result; returns how many old entries were evicted to make room.
    pub fn push(&self, result: DetectionResult) -> usize {
        let mut state = self.lock();
        let mut evicted = 0;
        while state.entries.len() >= self.capacity {
            state.entries.pop_front();
            evicted += 1;
        }
        state.dropped_total += evicted as u64;
        state.dropped_unreported += evicted as u64;
        let id = state.next_id;
        state.next_id += 1;
        state.entries.push_back(PendingEntry {
            id,
            enqueued_at: Instant::now(),
            result,
        });
        if evicted > 0 {
            log::warn!(
                "pending report queue full ({}), dropped {} oldest",
                self.capacity,
                evicted
            );
        }
        evicted
    }

    /// Clone of the oldest entry, after discarding expired ones.
    ///
    /// The entry stays queued; remove it with [`remove_front_if`](Self::remove_front_if)
    /// once it has been delivered.
    pub fn peek_front(&self) -> Option<PendingEntry> {
        let mut state = self.lock();
        let mut expired = 0u64;
        while let Some(front) = state.entries.front() {
            if front.enqueued_at.elapsed() <= self.max_age {
                break;
            }
            state.entries.pop_front();
            expired += 1;
        }
        if expired > 0 {
            state.dropped_total += expired;
            state.dropped_unreported += expired;
            log::warn!("expired {} pending reports older than {:?}", expired, self.max_age);
        }
        state.entries.front().cloned()
    }

    /// Remove the head if it is still the entry `id`.
    pub fn remove_front_if(&self, id: u64) -> bool {
        let mut state = self.lock();
        if state.entries.front().map(|e| e.id) == Some(id) {
            state.entries.pop_front();
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops not yet reported in a heartbeat. Resets the counter.
    pub fn take_unreported_drops(&self) -> u64 {
        std::mem::take(&mut self.lock().dropped_unreported)
    }

    /// Give back a count taken by a heartbeat that failed to send.
    pub fn restore_unreported_drops(&self, count: u64) {
        self.lock().dropped_unreported += count;
    }

    pub fn dropped_total(&self) -> u64 {
        self.lock().dropped_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(plate: &str) -> DetectionResult {
        DetectionResult::new(
            "entrance",
            crate::detect::PlateReading::new(plate, 0.5),
            vec![1, 2, 3],
            chrono::Utc::now(),
        )
    }

    #[test]
    fn evicts_oldest_when_full() {
        let queue = PendingReports::new(2, Duration::from_secs(60));
        assert_eq!(queue.push(result("A")), 0);
        assert_eq!(queue.push(result("B")), 0);
        assert_eq!(queue.push(result("C")), 1);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.peek_front().unwrap().result.plate, "B");
        assert_eq!(queue.dropped_total(), 1);
        assert_eq!(queue.take_unreported_drops(), 1);
        assert_eq!(queue.take_unreported_drops(), 0);
        queue.restore_unreported_drops(1);
        assert_eq!(queue.take_unreported_drops(), 1);
    }

    #[test]
    fn removes_only_matching_head() {
        let queue = PendingReports::new(4, Duration::from_secs(60));
        queue.push(result("A"));
        queue.push(result("B"));
        let head = queue.peek_front().unwrap();
        assert!(!queue.remove_front_if(head.id + 1));
        assert!(queue.remove_front_if(head.id));
        assert_eq!(queue.peek_front().unwrap().result.plate, "B");
    }

    #[test]
    fn expires_old_entries() {
        let queue = PendingReports::new(4, Duration::from_millis(20));
        queue.push(result("A"));
        std::thread::sleep(Duration::from_millis(50));
        queue.push(result("B"));
        assert_eq!(queue.peek_front().unwrap().result.plate, "B");
        assert_eq!(queue.dropped_total(), 1);
    }
}
