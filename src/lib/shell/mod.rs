//! Interactive shell state. All state changes go through [`Shell::update`],
//! which may hand back an [`Effect`] for the runtime to perform off the UI
//! path; the effect's outcome comes back later as another [`Message`].

pub mod completion;
pub mod history;
pub mod input;
pub mod output;
pub mod path;

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::sandbox::{self, Directory, ProcessResponse, SandboxClient, clean_terminal_output};

pub use completion::{CompletionGrid, CompletionRequest};
pub use history::History;
pub use input::InputLine;
pub use output::{MAX_OUTPUT_LINES, OutputBuffer};

pub const HELP: &str = "Available commands:
  help          - Show this help message
  clear, cls    - Clear screen
  cd <dir>      - Change the working directory
  exit, quit    - Exit shell

  Any other command will be executed in the sandbox environment.";

pub const KEY_HINT: &str =
    "Press Ctrl+C to exit, Ctrl+L to clear, ↑/↓ for history, Tab for completion";

const PAGE_SCROLL: usize = 10;
const WHEEL_SCROLL: usize = 3;

/// Keys the shell reacts to, already decoded from the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Tab,
    BackTab,
    Backspace,
    Delete,
    Left,
    Right,
    Up,
    Down,
    Home,
    End,
    PageUp,
    PageDown,
    Esc,
    /// Ctrl+L
    ClearScreen,
    /// Ctrl+U
    ClearLine,
    /// Ctrl+C / Ctrl+D
    Quit,
    WheelUp,
    WheelDown,
}

#[derive(Debug)]
pub enum Message {
    Key(Key),
    Resize { width: u16, height: u16 },
    CommandFinished {
        command: String,
        result: sandbox::Result<ProcessResponse>,
    },
    CompletionLoaded {
        generation: u64,
        result: sandbox::Result<Directory>,
    },
}

/// Work the runtime performs on the shell's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Execute { command: String, working_dir: String },
    ListDirectory { generation: u64, path: String },
    Quit,
}

#[derive(Debug, Clone)]
struct PendingCompletion {
    generation: u64,
    request: CompletionRequest,
    original_input: String,
}

#[derive(Debug)]
pub struct Shell {
    workspace: String,
    sandbox: String,
    cwd: String,
    input: InputLine,
    history: History,
    output: OutputBuffer,
    completion: Option<CompletionGrid>,
    pending: Option<PendingCompletion>,
    generation: u64,
    executing: bool,
    quitting: bool,
    width: u16,
    height: u16,
}

impl Shell {
    pub fn new(workspace: impl Into<String>, sandbox: impl Into<String>) -> Self {
        let mut shell = Self {
            workspace: workspace.into(),
            sandbox: sandbox.into(),
            cwd: "/".to_string(),
            input: InputLine::default(),
            history: History::default(),
            output: OutputBuffer::default(),
            completion: None,
            pending: None,
            generation: 0,
            executing: false,
            quitting: false,
            width: 80,
            height: 24,
        };
        let banner = format!(
            "Welcome to Sandbox Shell!\nConnected to: {}/{}\nType 'help' for available commands.\n\nCurrent directory: {}",
            shell.workspace, shell.sandbox, shell.cwd
        );
        shell.output.push(&banner);
        shell
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn input(&self) -> &InputLine {
        &self.input
    }

    pub fn output(&self) -> &OutputBuffer {
        &self.output
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn completion(&self) -> Option<&CompletionGrid> {
        self.completion.as_ref()
    }

    pub fn is_executing(&self) -> bool {
        self.executing
    }

    pub fn is_completing(&self) -> bool {
        self.pending.is_some()
    }

    pub fn should_quit(&self) -> bool {
        self.quitting
    }

    pub fn prompt(&self) -> String {
        format!("[{}@sandbox:{}]$ ", self.workspace, self.cwd)
    }

    pub fn update(&mut self, message: Message) -> Option<Effect> {
        match message {
            Message::Key(key) => self.on_key(key),
            Message::Resize { width, height } => {
                self.width = width;
                self.height = height;
                if let Some(grid) = self.completion.as_mut() {
                    grid.layout(width);
                }
                None
            }
            Message::CommandFinished { command, result } => {
                self.executing = false;
                self.output.push(&render_command_output(&command, result));
                None
            }
            Message::CompletionLoaded { generation, result } => {
                self.on_completion_loaded(generation, result);
                None
            }
        }
    }

    fn on_key(&mut self, key: Key) -> Option<Effect> {
        match key {
            Key::Quit => return self.quit(),
            Key::ClearScreen => {
                self.output.clear();
                return None;
            }
            Key::PageUp => self.output.scroll_up(PAGE_SCROLL),
            Key::PageDown => self.output.scroll_down(PAGE_SCROLL),
            Key::WheelUp => self.output.scroll_up(WHEEL_SCROLL),
            Key::WheelDown => self.output.scroll_down(WHEEL_SCROLL),
            _ if self.completion.is_some() => return self.on_completion_key(key),
            _ => return self.on_input_key(key),
        }
        None
    }

    fn on_completion_key(&mut self, key: Key) -> Option<Effect> {
        let Some(grid) = self.completion.as_mut() else {
            return None;
        };
        match key {
            Key::Tab | Key::Right => grid.next(),
            Key::BackTab | Key::Left => grid.previous(),
            Key::Up => grid.up(),
            Key::Down => grid.down(),
            Key::Enter => {
                self.completion = None;
                return None;
            }
            Key::Esc => {
                let original = grid.original_input().to_string();
                self.input.set(original);
                self.completion = None;
                return None;
            }
            // Anything else keeps the previewed candidate and edits on.
            other => {
                self.completion = None;
                return self.on_input_key(other);
            }
        }
        let preview = grid.preview();
        self.input.set(preview);
        None
    }

    fn on_input_key(&mut self, key: Key) -> Option<Effect> {
        match key {
            Key::Enter => return self.submit(),
            Key::Tab => return self.begin_completion(),
            Key::Up => {
                if let Some(entry) = self.history.previous() {
                    let entry = entry.to_string();
                    self.cancel_completion();
                    self.input.set(entry);
                }
                return None;
            }
            Key::Down => {
                // Only moves while browsing, so a half-typed line survives.
                if let Some(entry) = self.history.next() {
                    let entry = entry.to_string();
                    self.cancel_completion();
                    self.input.set(entry);
                }
                return None;
            }
            Key::Esc => {
                self.cancel_completion();
                return None;
            }
            Key::Left => self.input.left(),
            Key::Right => self.input.right(),
            Key::Home => self.input.home(),
            Key::End => self.input.end(),
            Key::Char(c) => {
                self.cancel_completion();
                self.input.insert(c);
            }
            Key::Backspace => {
                self.cancel_completion();
                self.input.backspace();
            }
            Key::Delete => {
                self.cancel_completion();
                self.input.delete();
            }
            Key::ClearLine => {
                self.cancel_completion();
                self.input.clear();
            }
            Key::BackTab
            | Key::PageUp
            | Key::PageDown
            | Key::WheelUp
            | Key::WheelDown
            | Key::ClearScreen
            | Key::Quit => {}
        }
        None
    }

    fn quit(&mut self) -> Option<Effect> {
        self.quitting = true;
        Some(Effect::Quit)
    }

    fn submit(&mut self) -> Option<Effect> {
        if self.executing {
            return None;
        }
        let command = self.input.text().trim().to_string();
        if command.is_empty() {
            return None;
        }
        self.cancel_completion();
        self.input.clear();
        self.history.push(command.clone());

        let mut parts = command.split_whitespace();
        match parts.next() {
            Some("help") => self.output.push(HELP),
            Some("clear" | "cls") => self.output.clear(),
            Some("exit" | "quit") => return self.quit(),
            Some("cd") => {
                if let Some(target) = parts.next() {
                    self.cwd = path::resolve(&self.cwd, target);
                }
                self.output.push(&format!("$ {}", command));
            }
            _ => {
                self.executing = true;
                return Some(Effect::Execute {
                    command,
                    working_dir: self.cwd.clone(),
                });
            }
        }
        None
    }

    fn begin_completion(&mut self) -> Option<Effect> {
        let original_input = self.input.text().to_string();
        let request = completion::plan(&original_input, &self.cwd)?;
        self.generation += 1;
        let path = request.directory.clone();
        self.pending = Some(PendingCompletion {
            generation: self.generation,
            request,
            original_input,
        });
        Some(Effect::ListDirectory {
            generation: self.generation,
            path,
        })
    }

    fn cancel_completion(&mut self) {
        if self.pending.take().is_some() {
            debug!(generation = self.generation, "completion cancelled");
        }
    }

    fn on_completion_loaded(&mut self, generation: u64, result: sandbox::Result<Directory>) {
        let pending = match self.pending.take() {
            Some(pending) if pending.generation == generation => pending,
            other => {
                debug!(generation, "discarding stale completion");
                self.pending = other;
                return;
            }
        };
        let listing = match result {
            Ok(listing) => listing,
            Err(e) => {
                debug!(error = %e, "completion listing failed");
                return;
            }
        };
        let PendingCompletion {
            request,
            original_input,
            ..
        } = pending;
        let found = completion::candidates(&listing, &request.prefix, request.directories_only);
        if let Some(grid) = CompletionGrid::new(found, request.retained, original_input, self.width)
        {
            self.input.set(grid.preview());
            self.completion = Some(grid);
        }
    }
}

/// `$ command`, then the cleaned logs, then the exit code when non-zero.
fn render_command_output(command: &str, result: sandbox::Result<ProcessResponse>) -> String {
    match result {
        Ok(process) => {
            let mut text = format!("$ {}", command);
            let logs = clean_terminal_output(&process.logs);
            if !logs.is_empty() {
                text.push('\n');
                text.push_str(&logs);
            }
            if let Some(code) = process.exit_code.filter(|code| *code != 0) {
                text.push_str(&format!("\n(exit code: {})", code));
            }
            text
        }
        Err(e) => format!("$ {}\nError executing command: {}", command, e),
    }
}

/// Runs one effect against the sandbox and returns the message to feed back
/// into [`Shell::update`].
pub async fn perform(client: Arc<SandboxClient>, effect: Effect) -> Option<Message> {
    match effect {
        Effect::Execute {
            command,
            working_dir,
        } => {
            let name = format!("blsh-{}", &Uuid::new_v4().simple().to_string()[..8]);
            let result = client.execute_command(&command, &name, &working_dir).await;
            Some(Message::CommandFinished { command, result })
        }
        Effect::ListDirectory { generation, path } => {
            let result = client.list_directory(&path).await;
            Some(Message::CompletionLoaded { generation, result })
        }
        Effect::Quit => {
            if let Err(e) = client.close().await {
                debug!(error = %e, "closing sandbox client failed");
            }
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{File, Subdirectory};

    fn shell() -> Shell {
        Shell::new("acme", "dev")
    }

    fn type_text(shell: &mut Shell, text: &str) {
        for c in text.chars() {
            shell.update(Message::Key(Key::Char(c)));
        }
    }

    fn root_listing() -> Directory {
        Directory {
            path: "/".into(),
            name: "/".into(),
            files: vec![File {
                name: "host.txt".into(),
                size: 12,
            }],
            subdirectories: vec![Subdirectory {
                name: "home".into(),
                path: "/home".into(),
            }],
        }
    }

    fn last_line(shell: &Shell) -> String {
        shell.output().lines().last().unwrap_or_default().to_string()
    }

    #[test]
    fn starts_with_banner_at_root() {
        let s = shell();
        assert_eq!(s.cwd(), "/");
        assert_eq!(s.prompt(), "[acme@sandbox:/]$ ");
        assert!(s.output().lines().any(|l| l.contains("acme/dev")));
    }

    #[test]
    fn enter_dispatches_remote_commands_in_cwd() {
        let mut s = shell();
        type_text(&mut s, "  ls -la ");
        let effect = s.update(Message::Key(Key::Enter));
        assert_eq!(
            effect,
            Some(Effect::Execute {
                command: "ls -la".into(),
                working_dir: "/".into()
            })
        );
        assert!(s.is_executing());
        assert!(s.input().is_empty());

        // Enter is ignored while a command is in flight, typing is not.
        type_text(&mut s, "pwd");
        assert_eq!(s.update(Message::Key(Key::Enter)), None);
        assert_eq!(s.input().text(), "pwd");

        s.update(Message::CommandFinished {
            command: "ls -la".into(),
            result: Ok(ProcessResponse {
                logs: "\x1b[34mbin\x1b[0m\nusr\n".into(),
                exit_code: Some(2),
                ..Default::default()
            }),
        });
        assert!(!s.is_executing());
        let tail: Vec<_> = s.output().lines().rev().take(4).collect();
        assert_eq!(tail, ["(exit code: 2)", "usr", "bin", "$ ls -la"]);
    }

    #[test]
    fn failed_commands_render_as_output() {
        let mut s = shell();
        type_text(&mut s, "make");
        s.update(Message::Key(Key::Enter));
        s.update(Message::CommandFinished {
            command: "make".into(),
            result: Err(sandbox::Error::Tool("boom".into())),
        });
        assert!(!s.is_executing());
        assert_eq!(last_line(&s), "Error executing command: MCP error: boom");
    }

    #[test]
    fn builtins_stay_local() {
        let mut s = shell();
        type_text(&mut s, "cd /var/log");
        assert_eq!(s.update(Message::Key(Key::Enter)), None);
        assert_eq!(s.cwd(), "/var/log");
        assert_eq!(last_line(&s), "$ cd /var/log");

        type_text(&mut s, "cd ..");
        s.update(Message::Key(Key::Enter));
        assert_eq!(s.cwd(), "/var");

        type_text(&mut s, "cd");
        s.update(Message::Key(Key::Enter));
        assert_eq!(s.cwd(), "/var");

        type_text(&mut s, "help");
        s.update(Message::Key(Key::Enter));
        assert!(s.output().lines().any(|l| l.starts_with("Available commands")));

        type_text(&mut s, "clear");
        s.update(Message::Key(Key::Enter));
        assert!(s.output().is_empty());

        type_text(&mut s, "exit");
        assert_eq!(s.update(Message::Key(Key::Enter)), Some(Effect::Quit));
        assert!(s.should_quit());
    }

    #[test]
    fn history_browsing() {
        let mut s = shell();
        for cmd in ["cd /a", "cd /b", "cd /c"] {
            type_text(&mut s, cmd);
            s.update(Message::Key(Key::Enter));
        }
        s.update(Message::Key(Key::Up));
        assert_eq!(s.input().text(), "cd /c");
        s.update(Message::Key(Key::Up));
        s.update(Message::Key(Key::Up));
        s.update(Message::Key(Key::Up));
        assert_eq!(s.input().text(), "cd /a");
        s.update(Message::Key(Key::Down));
        assert_eq!(s.input().text(), "cd /b");
        s.update(Message::Key(Key::Down));
        s.update(Message::Key(Key::Down));
        assert_eq!(s.input().text(), "");
    }

    #[test]
    fn down_keeps_a_half_typed_line() {
        let mut s = shell();
        type_text(&mut s, "cd /a");
        s.update(Message::Key(Key::Enter));
        type_text(&mut s, "ls -la");
        s.update(Message::Key(Key::Down));
        assert_eq!(s.input().text(), "ls -la");
    }

    fn complete(s: &mut Shell, input: &str) -> u64 {
        type_text(s, input);
        match s.update(Message::Key(Key::Tab)) {
            Some(Effect::ListDirectory { generation, path }) => {
                assert_eq!(path, "/");
                generation
            }
            other => panic!("expected a listing, got {:?}", other),
        }
    }

    #[test]
    fn tab_completes_into_a_grid() {
        let mut s = shell();
        let generation = complete(&mut s, "ls /ho");
        s.update(Message::CompletionLoaded {
            generation,
            result: Ok(root_listing()),
        });

        let grid = s.completion().unwrap();
        assert_eq!(grid.candidates(), ["home/", "host.txt"]);
        assert_eq!(s.input().text(), "ls /home/");

        s.update(Message::Key(Key::Tab));
        assert_eq!(s.input().text(), "ls /host.txt");
        s.update(Message::Key(Key::Tab));
        assert_eq!(s.input().text(), "ls /home/");

        s.update(Message::Key(Key::Enter));
        assert!(s.completion().is_none());
        assert_eq!(s.input().text(), "ls /home/");
        assert!(!s.is_executing());
    }

    #[test]
    fn escape_restores_original_input() {
        let mut s = shell();
        let generation = complete(&mut s, "ls /ho");
        s.update(Message::CompletionLoaded {
            generation,
            result: Ok(root_listing()),
        });
        s.update(Message::Key(Key::BackTab));
        assert_eq!(s.input().text(), "ls /host.txt");
        s.update(Message::Key(Key::Esc));
        assert!(s.completion().is_none());
        assert_eq!(s.input().text(), "ls /ho");
    }

    #[test]
    fn typing_accepts_the_preview() {
        let mut s = shell();
        let generation = complete(&mut s, "ls /ho");
        s.update(Message::CompletionLoaded {
            generation,
            result: Ok(root_listing()),
        });
        type_text(&mut s, "u");
        assert!(s.completion().is_none());
        assert_eq!(s.input().text(), "ls /home/u");
    }

    #[test]
    fn repeated_completion_after_splice_is_consistent() {
        let mut s = shell();
        let generation = complete(&mut s, "ls /ho");
        s.update(Message::CompletionLoaded {
            generation,
            result: Ok(root_listing()),
        });
        s.update(Message::Key(Key::Enter));

        match s.update(Message::Key(Key::Tab)) {
            Some(Effect::ListDirectory { generation, path }) => {
                assert_eq!(path, "/home");
                s.update(Message::CompletionLoaded {
                    generation,
                    result: Ok(Directory::default()),
                });
            }
            other => panic!("expected a listing, got {:?}", other),
        }
        assert!(s.completion().is_none());
        assert_eq!(s.input().text(), "ls /home/");
    }

    #[test]
    fn stale_and_failed_listings_are_ignored() {
        let mut s = shell();
        let stale = complete(&mut s, "ls /ho");
        // Editing cancels the pending cycle.
        s.update(Message::Key(Key::Backspace));
        assert!(!s.is_completing());
        s.update(Message::CompletionLoaded {
            generation: stale,
            result: Ok(root_listing()),
        });
        assert!(s.completion().is_none());
        assert_eq!(s.input().text(), "ls /h");

        let generation = match s.update(Message::Key(Key::Tab)) {
            Some(Effect::ListDirectory { generation, .. }) => generation,
            other => panic!("expected a listing, got {:?}", other),
        };
        assert_ne!(generation, stale);
        s.update(Message::CompletionLoaded {
            generation,
            result: Err(sandbox::Error::Tool("no such directory".into())),
        });
        assert!(s.completion().is_none());
        assert!(!s.is_completing());
        assert_eq!(s.input().text(), "ls /h");
    }

    #[test]
    fn recalling_history_drops_the_pending_listing() {
        let mut s = shell();
        type_text(&mut s, "cd /etc");
        s.update(Message::Key(Key::Enter));
        let generation = complete(&mut s, "ls /ho");

        s.update(Message::Key(Key::Up));
        assert_eq!(s.input().text(), "cd /etc");
        assert!(!s.is_completing());

        s.update(Message::CompletionLoaded {
            generation,
            result: Ok(root_listing()),
        });
        assert!(s.completion().is_none());
        assert_eq!(s.input().text(), "cd /etc");
    }

    #[test]
    fn non_path_commands_do_not_complete() {
        let mut s = shell();
        type_text(&mut s, "echo /ho");
        assert_eq!(s.update(Message::Key(Key::Tab)), None);
        assert!(!s.is_completing());
    }

    #[test]
    fn resize_relayouts_an_open_grid() {
        let mut s = shell();
        let generation = complete(&mut s, "ls /");
        let listing = Directory {
            subdirectories: (0..12)
                .map(|i| Subdirectory {
                    name: format!("dir{:02}", i),
                    path: String::new(),
                })
                .collect(),
            ..Default::default()
        };
        s.update(Message::CompletionLoaded {
            generation,
            result: Ok(listing),
        });
        let wide = s.completion().unwrap().cols();
        s.update(Message::Resize {
            width: 20,
            height: 24,
        });
        let grid = s.completion().unwrap();
        assert!(grid.cols() < wide);
        assert_eq!(grid.cols(), 2);
        assert_eq!(grid.rows(), 6);
    }

    #[test]
    fn quit_key_requests_shutdown() {
        let mut s = shell();
        assert_eq!(s.update(Message::Key(Key::Quit)), Some(Effect::Quit));
        assert!(s.should_quit());
    }
}
