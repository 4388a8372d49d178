use std::collections::VecDeque;

pub const MAX_OUTPUT_LINES: usize = 1000;

/// Scrollback for the output pane. Oldest lines are evicted first once the
/// cap is reached. `scroll` counts lines up from the bottom; zero follows new
/// output.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    lines: VecDeque<String>,
    capacity: usize,
    scroll: usize,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::with_capacity(MAX_OUTPUT_LINES)
    }
}

impl OutputBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity.min(256)),
            capacity: capacity.max(1),
            scroll: 0,
        }
    }

    /// Appends a possibly multi-line block.
    pub fn push(&mut self, text: &str) {
        let mut added = 0;
        for line in text.split('\n') {
            if self.lines.len() == self.capacity {
                self.lines.pop_front();
            }
            self.lines.push_back(line.to_string());
            added += 1;
        }
        if self.scroll > 0 {
            // Keep the same lines in view while the user is reading back.
            self.scroll = (self.scroll + added).min(self.max_scroll());
        }
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.scroll = 0;
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn lines(&self) -> impl DoubleEndedIterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn scroll_offset(&self) -> usize {
        self.scroll
    }

    fn max_scroll(&self) -> usize {
        self.lines.len().saturating_sub(1)
    }

    pub fn scroll_up(&mut self, by: usize) {
        self.scroll = (self.scroll + by).min(self.max_scroll());
    }

    pub fn scroll_down(&mut self, by: usize) {
        self.scroll = self.scroll.saturating_sub(by);
    }

    /// The `height` lines that end `scroll` lines above the bottom.
    pub fn visible(&self, height: usize) -> Vec<&str> {
        let end = self.lines.len().saturating_sub(self.scroll);
        let start = end.saturating_sub(height);
        self.lines.range(start..end).map(String::as_str).collect()
    }
}
