//! Path completion: which directory to list for a given input line, which
//! entries match, and the navigable grid they are shown in.

use crate::sandbox::Directory;

use super::path;

/// Commands whose arguments complete as paths.
pub const PATH_COMMANDS: &[&str] = &[
    "cd", "ls", "ll", "la", "l", "cat", "less", "more", "mkdir", "rmdir", "rm", "cp", "mv", "find",
    "grep", "touch", "chmod", "chown", "file", "zip", "unzip", "tar", "gzip", "gunzip", "bz2",
    "bunzip2", "bzip2", "xz", "unxz", "lzma", "unlzma", "lzop", "unlzop", "rar", "unrar", "7z",
    "un7z",
];

/// Commands that only ever take a directory, so files are not offered.
pub const DIRECTORY_ONLY_COMMANDS: &[&str] = &["cd", "mkdir", "rmdir"];

/// Columns reserved around the grid and between cells.
const GRID_MARGIN: usize = 4;
const CELL_PADDING: usize = 2;

/// What to list and how to splice the answer back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionRequest {
    /// Absolute directory on the sandbox to list.
    pub directory: String,
    /// Case-insensitive prefix candidates must start with.
    pub prefix: String,
    /// Input text kept verbatim in front of the chosen candidate.
    pub retained: String,
    pub directories_only: bool,
}

/// Works out the completion for `input` typed in `cwd`, or `None` when the
/// line is not completable (unknown command, a flag, or a bare command
/// without trailing space).
pub fn plan(input: &str, cwd: &str) -> Option<CompletionRequest> {
    let trailing_space = input.ends_with(char::is_whitespace);
    let parts: Vec<&str> = input.split_whitespace().collect();
    let (&command, _) = parts.split_first()?;
    let last = *parts.last()?;

    if parts.len() > 1 && last.starts_with('-') && !trailing_space {
        return None;
    }
    if !PATH_COMMANDS.contains(&command) {
        return None;
    }
    if parts.len() == 1 && !trailing_space {
        return None;
    }

    let directories_only = DIRECTORY_ONLY_COMMANDS.contains(&command);
    if trailing_space {
        return Some(CompletionRequest {
            directory: cwd.to_string(),
            prefix: String::new(),
            retained: input.to_string(),
            directories_only,
        });
    }

    // No trailing whitespace, so the line ends with `last`.
    let token_start = input.len() - last.len();
    let request = match last.rfind('/') {
        None => CompletionRequest {
            directory: cwd.to_string(),
            prefix: last.to_string(),
            retained: input[..token_start].to_string(),
            directories_only,
        },
        Some(slash) => {
            let head = &last[..slash];
            let directory = if last.starts_with('/') {
                path::clean(head)
            } else {
                path::resolve(cwd, head)
            };
            CompletionRequest {
                directory,
                prefix: last[slash + 1..].to_string(),
                retained: input[..token_start + slash + 1].to_string(),
                directories_only,
            }
        }
    };
    Some(request)
}

/// Matching entries: subdirectories (with a trailing `/`) first, then files,
/// each group sorted.
pub fn candidates(listing: &Directory, prefix: &str, directories_only: bool) -> Vec<String> {
    let prefix = prefix.to_lowercase();
    let matches = |name: &str| name.to_lowercase().starts_with(&prefix);

    let mut dirs: Vec<String> = listing
        .subdirectories
        .iter()
        .filter(|d| matches(&d.name))
        .map(|d| format!("{}/", d.name))
        .collect();
    dirs.sort();

    let mut files: Vec<String> = if directories_only {
        Vec::new()
    } else {
        listing
            .files
            .iter()
            .filter(|f| matches(&f.name))
            .map(|f| f.name.clone())
            .collect()
    };
    files.sort();

    dirs.extend(files);
    dirs
}

/// An active completion: candidates laid out row-major in a grid, one of
/// them selected and previewed in the input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionGrid {
    candidates: Vec<String>,
    selected: usize,
    retained: String,
    original_input: String,
    cols: usize,
    rows: usize,
}

impl CompletionGrid {
    /// `None` when there is nothing to choose from.
    pub fn new(
        candidates: Vec<String>,
        retained: String,
        original_input: String,
        width: u16,
    ) -> Option<Self> {
        if candidates.is_empty() {
            return None;
        }
        let mut grid = Self {
            candidates,
            selected: 0,
            retained,
            original_input,
            cols: 1,
            rows: 1,
        };
        grid.layout(width);
        Some(grid)
    }

    /// Recomputes columns and rows for a terminal `width` columns wide.
    pub fn layout(&mut self, width: u16) {
        let cell = self
            .candidates
            .iter()
            .map(|c| c.chars().count())
            .max()
            .unwrap_or(0)
            + CELL_PADDING;
        let available = usize::from(width).saturating_sub(GRID_MARGIN);
        self.cols = (available / cell).max(1);
        self.rows = self.candidates.len().div_ceil(self.cols);
    }

    pub fn candidates(&self) -> &[String] {
        &self.candidates
    }

    pub fn selected(&self) -> usize {
        self.selected
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn original_input(&self) -> &str {
        &self.original_input
    }

    /// The input line as it reads with the current selection spliced in.
    pub fn preview(&self) -> String {
        format!("{}{}", self.retained, self.candidates[self.selected])
    }

    /// Candidate rows for rendering, each a slice of at most `cols` entries.
    pub fn grid_rows(&self) -> impl Iterator<Item = &[String]> {
        self.candidates.chunks(self.cols)
    }

    pub fn next(&mut self) {
        self.selected = (self.selected + 1) % self.candidates.len();
    }

    pub fn previous(&mut self) {
        let len = self.candidates.len();
        self.selected = (self.selected + len - 1) % len;
    }

    /// One row up; from the top row, the lowest row that has this column.
    pub fn up(&mut self) {
        if self.selected >= self.cols {
            self.selected -= self.cols;
            return;
        }
        let col = self.selected;
        let mut index = (self.rows - 1) * self.cols + col;
        if index >= self.candidates.len() {
            index = self.rows.saturating_sub(2) * self.cols + col;
        }
        self.selected = index.min(self.candidates.len() - 1);
    }

    /// One row down; from the lowest row of this column, back to the top.
    pub fn down(&mut self) {
        let below = self.selected + self.cols;
        self.selected = if below < self.candidates.len() {
            below
        } else {
            self.selected % self.cols
        };
    }
}
