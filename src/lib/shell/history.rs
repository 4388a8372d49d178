/// Submitted commands, oldest first, with an optional browsing cursor.
#[derive(Debug, Default, Clone)]
pub struct History {
    entries: Vec<String>,
    cursor: Option<usize>,
}

impl History {
    pub fn push(&mut self, command: impl Into<String>) {
        self.entries.push(command.into());
        self.cursor = None;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_browsing(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn reset(&mut self) {
        self.cursor = None;
    }

    /// Steps towards older entries, stopping at the oldest.
    pub fn previous(&mut self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        let index = match self.cursor {
            None => self.entries.len() - 1,
            Some(i) => i.saturating_sub(1),
        };
        self.cursor = Some(index);
        Some(&self.entries[index])
    }

    /// Steps towards newer entries. Past the newest the cursor is released
    /// and the input goes back to empty, reported as `""`. Returns `None`
    /// when not browsing.
    pub fn next(&mut self) -> Option<&str> {
        match self.cursor? {
            i if i + 1 < self.entries.len() => {
                self.cursor = Some(i + 1);
                Some(&self.entries[i + 1])
            }
            _ => {
                self.cursor = None;
                Some("")
            }
        }
    }
}
