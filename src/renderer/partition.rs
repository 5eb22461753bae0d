//! Splits a visible-item list into one contiguous range per worker.

use std::ops::Range;

pub type WorkerId = usize;

/// Half-open `[start, end)` interval of item indices owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkRange {
    pub start: usize,
    pub end: usize,
}

impl WorkRange {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn as_range(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Range of `worker_id` when `problem_size` items are spread over
/// `worker_count` workers. Sizes differ by at most one; the first
/// `problem_size % worker_count` workers take the extra item.
pub fn partition(problem_size: usize, worker_id: WorkerId, worker_count: usize) -> WorkRange {
    let worker_count = worker_count.max(1);
    debug_assert!(worker_id < worker_count, "worker {worker_id} out of {worker_count}");

    let base = problem_size / worker_count;
    let remainder = problem_size % worker_count;

    let start = worker_id * base + worker_id.min(remainder);
    let len = base + usize::from(worker_id < remainder);
    WorkRange {
        start,
        end: start + len,
    }
}

pub fn will_do_work(problem_size: usize, worker_id: WorkerId, worker_count: usize) -> bool {
    !partition(problem_size, worker_id, worker_count).is_empty()
}

/// Highest worker id whose range is non-empty, scanning down from the top.
pub fn last_worker_with_work(problem_size: usize, worker_count: usize) -> Option<WorkerId> {
    (0..worker_count.max(1))
        .rev()
        .find(|&worker| will_do_work(problem_size, worker, worker_count))
}
