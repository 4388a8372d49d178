use ratatui::prelude::*;

/// Styles for the shell screen. Built once in `main` and handed to the
/// terminal loop.
#[derive(Debug, Clone)]
pub struct Theme {
    pub border: Style,
    pub title: Style,
    pub command: Style,
    pub exit_code: Style,
    pub error: Style,
    pub prompt: Style,
    pub input: Style,
    pub busy: Style,
    pub candidate: Style,
    pub directory: Style,
    pub selected: Style,
    pub hint: Style,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            border: Style::default().fg(Color::DarkGray),
            title: Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            command: Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
            exit_code: Style::default().fg(Color::Yellow),
            error: Style::default().fg(Color::Red),
            prompt: Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            input: Style::default().fg(Color::White),
            busy: Style::default().fg(Color::Yellow),
            candidate: Style::default(),
            directory: Style::default().fg(Color::Blue),
            selected: Style::default().bg(Color::Blue).fg(Color::White),
            hint: Style::default().fg(Color::Gray),
        }
    }
}

impl Theme {
    /// Everything unstyled, for terminals that asked for no colour.
    pub fn plain() -> Self {
        let none = Style::default();
        Self {
            border: none,
            title: none,
            command: none,
            exit_code: none,
            error: none,
            prompt: none,
            input: none,
            busy: none,
            candidate: none,
            directory: none,
            selected: Style::default().add_modifier(Modifier::REVERSED),
            hint: none,
        }
    }

    pub fn output_line(&self, line: &str) -> Line<'static> {
        let style = if line.starts_with("$ ") {
            self.command
        } else if line.starts_with("(exit code:") {
            self.exit_code
        } else if line.starts_with("Error executing command:") {
            self.error
        } else {
            return Line::from(line.to_string());
        };
        Line::from(line.to_string()).style(style)
    }

    pub fn candidate_style(&self, candidate: &str, selected: bool) -> Style {
        if selected {
            self.selected
        } else if candidate.ends_with('/') {
            self.directory
        } else {
            self.candidate
        }
    }
}
