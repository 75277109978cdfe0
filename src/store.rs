use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// HistoryLog keeps broadcast lines in send order so late joiners can catch up.
///
/// Unbounded by default. With a capacity it acts as a ring buffer and drops
/// the oldest line once full.
#[derive(Debug, Default)]
pub struct HistoryLog {
    lines: VecDeque<Arc<str>>,
    capacity: Option<NonZeroUsize>,
    dropped: u64,
}

impl HistoryLog {
    pub fn new(capacity: Option<NonZeroUsize>) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    pub fn push(&mut self, line: Arc<str>) {
        if let Some(cap) = self.capacity {
            if self.lines.len() == cap.get() {
                self.lines.pop_front();
                self.dropped += 1;
            }
        }
        self.lines.push_back(line);
    }

    /// Every retained line, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<str>> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn capacity(&self) -> Option<NonZeroUsize> {
        self.capacity
    }

    /// Lines evicted by the ring buffer so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
