//! Bounded FIFO of not-yet-delivered output chunks.

use std::collections::VecDeque;

use protocol::BufferedOutput;

/// Output chunks waiting for a polling client.
///
/// Capacity is counted in entries, not bytes. When full, the oldest entry
/// is dropped to make room.
#[derive(Debug)]
pub struct OutputBuffer {
    chunks: VecDeque<String>,
    capacity: usize,
    dropped: u64,
}

impl OutputBuffer {
    /// Creates an empty buffer holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            chunks: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Appends a chunk, evicting the oldest entry on overflow.
    ///
    /// Returns true if an entry was evicted.
    pub fn push(&mut self, chunk: String) -> bool {
        let evicted = if self.chunks.len() >= self.capacity {
            self.chunks.pop_front();
            self.dropped += 1;
            true
        } else {
            false
        };
        self.chunks.push_back(chunk);
        evicted
    }

    /// Dequeues up to `max_entries` chunks in arrival order.
    ///
    /// Stops before the concatenated text would exceed `max_bytes`, but always
    /// takes the first entry so an oversized chunk cannot wedge the buffer.
    pub fn drain(&mut self, max_entries: usize, max_bytes: usize) -> BufferedOutput {
        let mut output = String::new();
        let mut lines = 0;

        while lines < max_entries {
            let Some(next) = self.chunks.front() else {
                break;
            };
            if lines > 0 && output.len() + next.len() > max_bytes {
                break;
            }
            if let Some(chunk) = self.chunks.pop_front() {
                output.push_str(&chunk);
                lines += 1;
            }
        }

        BufferedOutput { output, lines }
    }

    /// Dequeues every chunk.
    pub fn drain_all(&mut self) -> BufferedOutput {
        let lines = self.chunks.len();
        let output = self.chunks.drain(..).collect::<String>();
        BufferedOutput { output, lines }
    }

    /// Number of buffered entries.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total entries evicted by overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_keeps_newest_oldest_first() {
        let mut buffer = OutputBuffer::new(3);
        for i in 0..10 {
            buffer.push(format!("{}", i));
        }

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped(), 7);
        let out = buffer.drain(usize::MAX, usize::MAX);
        assert_eq!(out.output, "789");
        assert_eq!(out.lines, 3);
    }

    #[test]
    fn test_push_reports_eviction() {
        let mut buffer = OutputBuffer::new(1);
        assert!(!buffer.push("a".into()));
        assert!(buffer.push("b".into()));
    }

    #[test]
    fn test_drain_respects_entry_limit() {
        let mut buffer = OutputBuffer::new(100);
        for i in 0..5 {
            buffer.push(format!("l{}\n", i));
        }

        let first = buffer.drain(2, usize::MAX);
        assert_eq!(first.output, "l0\nl1\n");
        assert_eq!(first.lines, 2);

        let second = buffer.drain(2, usize::MAX);
        assert_eq!(second.output, "l2\nl3\n");

        let third = buffer.drain(2, usize::MAX);
        assert_eq!(third.output, "l4\n");
        assert_eq!(third.lines, 1);

        assert!(buffer.drain(2, usize::MAX).is_empty());
    }

    #[test]
    fn test_drain_respects_byte_limit() {
        let mut buffer = OutputBuffer::new(100);
        buffer.push("aaaa".into());
        buffer.push("bbbb".into());
        buffer.push("cc".into());

        let out = buffer.drain(10, 6);
        assert_eq!(out.output, "aaaa");
        assert_eq!(out.lines, 1);
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_oversized_chunk_still_drains() {
        let mut buffer = OutputBuffer::new(10);
        buffer.push("x".repeat(50));

        let out = buffer.drain(10, 8);
        assert_eq!(out.lines, 1);
        assert_eq!(out.output.len(), 50);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_drain_all() {
        let mut buffer = OutputBuffer::new(10);
        buffer.push("a".into());
        buffer.push("b".into());

        let out = buffer.drain_all();
        assert_eq!(out.output, "ab");
        assert_eq!(out.lines, 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let mut buffer = OutputBuffer::new(0);
        assert_eq!(buffer.capacity(), 1);
        buffer.push("a".into());
        buffer.push("b".into());
        assert_eq!(buffer.drain_all().output, "b");
    }
}
