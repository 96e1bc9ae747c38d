//! Coalescing, size-bounded log sink.
//!
//! Entries are appended to a pending buffer and only become visible when the
//! buffer is flushed. The batching bounds the rate of UI-observable
//! mutations under event bursts; it introduces no reordering, since entries
//! keep arrival order within and across flushes. The flush timer itself is
//! owned by the manager loop: [`LogBuffer::append`] reports whether a flush
//! needs scheduling.

use std::collections::VecDeque;

use tether_types::LogEntry;

/// Pending/visible log queue bounded to a configured maximum.
#[derive(Debug)]
pub struct LogBuffer {
    pending: Vec<LogEntry>,
    visible: VecDeque<LogEntry>,
    max_entries: usize,
}

impl LogBuffer {
    /// Create a buffer retaining at most `max_entries` visible entries.
    pub fn new(max_entries: usize) -> Self {
        Self {
            pending: Vec::new(),
            visible: VecDeque::new(),
            max_entries,
        }
    }

    /// Append a timestamped entry to the pending buffer.
    ///
    /// Returns `true` when this was the first pending entry, i.e. the caller
    /// must schedule a deferred flush.
    #[must_use]
    pub fn append(&mut self, message: impl Into<String>) -> bool {
        self.pending.push(LogEntry::new(message));
        self.pending.len() == 1
    }

    /// Move all pending entries into the visible log, oldest-first, then
    /// drop the oldest visible entries beyond the configured maximum.
    pub fn flush(&mut self) {
        self.visible.extend(self.pending.drain(..));
        while self.visible.len() > self.max_entries {
            self.visible.pop_front();
        }
    }

    /// Whether entries are waiting to be flushed.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Discard pending entries without making them visible.
    ///
    /// Used when the flush timer's governing condition ends (shutdown, radio
    /// loss) before the timer fires.
    pub fn drop_pending(&mut self) {
        self.pending.clear();
    }

    /// The visible log, oldest entry first.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.visible.iter()
    }

    /// Snapshot of the visible log.
    pub fn to_vec(&self) -> Vec<LogEntry> {
        self.visible.iter().cloned().collect()
    }

    /// Number of visible entries.
    pub fn len(&self) -> usize {
        self.visible.len()
    }

    /// Whether the visible log is empty.
    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_pending_entry_requests_flush() {
        let mut log = LogBuffer::new(10);
        assert!(log.append("one"));
        assert!(!log.append("two"));

        log.flush();
        assert!(log.append("three"));
    }

    #[test]
    fn entries_invisible_until_flush() {
        let mut log = LogBuffer::new(10);
        let _ = log.append("one");
        assert!(log.is_empty());

        log.flush();
        assert_eq!(log.len(), 1);
        assert!(!log.has_pending());
    }

    #[test]
    fn flush_preserves_arrival_order() {
        let mut log = LogBuffer::new(10);
        let _ = log.append("one");
        let _ = log.append("two");
        log.flush();
        let _ = log.append("three");
        log.flush();

        let messages: Vec<_> = log.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["one", "two", "three"]);
    }

    #[test]
    fn overflow_drops_exactly_the_oldest() {
        let mut log = LogBuffer::new(3);
        for i in 1..=3 {
            let _ = log.append(i.to_string());
        }
        log.flush();
        assert_eq!(log.len(), 3);

        let _ = log.append("4");
        log.flush();
        assert_eq!(log.len(), 3);
        let messages: Vec<_> = log.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["2", "3", "4"]);
    }

    #[test]
    fn drop_pending_discards_without_exposing() {
        let mut log = LogBuffer::new(10);
        let _ = log.append("doomed");
        log.drop_pending();
        log.flush();
        assert!(log.is_empty());
    }
}
