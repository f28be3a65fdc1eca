use std::collections::VecDeque;

/// Keeps the most recent lines of a tab's job log.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    capacity: usize,
    lines: VecDeque<String>,
    total_lines_seen: u64,
}

impl LogBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            lines: VecDeque::with_capacity(capacity),
            total_lines_seen: 0,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub fn total_lines_seen(&self) -> u64 {
        self.total_lines_seen
    }

    #[must_use]
    pub fn earliest_buffered_index(&self) -> u64 {
        self.total_lines_seen
            .saturating_sub(self.lines.len() as u64)
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.total_lines_seen = 0;
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
        self.total_lines_seen += 1;
    }

    /// Appends a server log chunk, one entry per line. Blank chunks are skipped.
    pub fn append_chunk(&mut self, chunk: &str) {
        for line in chunk.lines() {
            let line = line.trim_end();
            if !line.is_empty() {
                self.push(line);
            }
        }
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn visible_lines(&self, start: usize, limit: usize) -> Vec<&str> {
        if limit == 0 || start >= self.lines.len() {
            return Vec::new();
        }

        self.lines
            .iter()
            .skip(start)
            .take(limit)
            .map(String::as_str)
            .collect()
    }

    /// The last `limit` lines, oldest first.
    #[must_use]
    pub fn tail(&self, limit: usize) -> Vec<&str> {
        let start = self.lines.len().saturating_sub(limit);
        self.visible_lines(start, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::LogBuffer;

    #[test]
    fn keeps_memory_bounded_to_capacity() {
        let mut buffer = LogBuffer::new(3);
        buffer.push("l1");
        buffer.push("l2");
        buffer.push("l3");
        buffer.push("l4");

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.total_lines_seen(), 4);
        assert_eq!(buffer.get(0), Some("l2"));
        assert_eq!(buffer.get(2), Some("l4"));
        assert_eq!(buffer.earliest_buffered_index(), 1);
    }

    #[test]
    fn chunks_split_into_lines_and_skip_blanks() {
        let mut buffer = LogBuffer::new(10);
        buffer.append_chunk("stage 1 started\n\nstage 1 done  \n");
        buffer.append_chunk("");

        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.get(1), Some("stage 1 done"));
    }

    #[test]
    fn tail_returns_latest_window_in_order() {
        let mut buffer = LogBuffer::new(5);
        for line in ["a", "b", "c", "d"] {
            buffer.push(line);
        }

        assert_eq!(buffer.tail(2), vec!["c", "d"]);
        assert_eq!(buffer.tail(10), vec!["a", "b", "c", "d"]);
        assert_eq!(buffer.visible_lines(1, 2), vec!["b", "c"]);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let mut buffer = LogBuffer::new(0);
        buffer.push("x");
        buffer.push("y");
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.get(0), Some("y"));
    }

    #[test]
    fn clear_resets_position() {
        let mut buffer = LogBuffer::new(2);
        buffer.push("x");
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.total_lines_seen(), 0);
    }
}
