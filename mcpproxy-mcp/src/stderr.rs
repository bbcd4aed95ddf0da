//! Per-upstream stderr capture

use parking_lot::Mutex;
use std::collections::VecDeque;

/// Fixed-capacity ring of the most recent stderr lines from a stdio
/// upstream. Shared between the transport's drain task and the
/// `tail_log` surface.
#[derive(Debug)]
pub struct StderrRing {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl StderrRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a line, evicting the oldest when full
    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// The most recent `n` lines, oldest first
    pub fn tail(&self, n: usize) -> Vec<String> {
        let lines = self.lines.lock();
        let skip = lines.len().saturating_sub(n);
        lines.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

impl Default for StderrRing {
    fn default() -> Self {
        Self::new(crate::STDERR_RING_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_evicts_oldest() {
        let ring = StderrRing::new(3);
        for i in 0..5 {
            ring.push(format!("line {}", i));
        }
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.tail(10), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn test_tail_returns_most_recent() {
        let ring = StderrRing::new(10);
        for i in 0..4 {
            ring.push(format!("line {}", i));
        }
        assert_eq!(ring.tail(2), vec!["line 2", "line 3"]);
    }
}
