use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use blsh::sandbox::SandboxClient;
use blsh::shell::{self, Effect, KEY_HINT, Key, Message, Shell};
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
        KeyModifiers, MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend, prelude::*, widgets::*};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info};

use crate::theme::Theme;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Takes over the terminal until the user quits, then closes the client.
pub async fn run_shell(client: Arc<SandboxClient>, theme: Theme) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, &client, &theme).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    shell::perform(client, Effect::Quit).await;
    result
}

async fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    client: &Arc<SandboxClient>,
    theme: &Theme,
) -> Result<()> {
    let mut shell = Shell::new(client.workspace(), client.sandbox_name());
    let (tx, mut rx) = mpsc::unbounded_channel();

    let size = terminal.size()?;
    shell.update(Message::Resize {
        width: size.width,
        height: size.height,
    });
    info!(
        workspace = client.workspace(),
        sandbox = client.sandbox_name(),
        "shell started"
    );

    loop {
        terminal.draw(|frame| draw(frame, &shell, theme))?;

        if event::poll(POLL_INTERVAL)? {
            let message = match event::read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => {
                    map_key(key).map(Message::Key)
                }
                Event::Mouse(mouse) => map_mouse(mouse).map(Message::Key),
                Event::Resize(width, height) => Some(Message::Resize { width, height }),
                _ => None,
            };
            if let Some(message) = message {
                apply(&mut shell, message, client, &tx);
            }
        }

        while let Ok(message) = rx.try_recv() {
            apply(&mut shell, message, client, &tx);
        }

        if shell.should_quit() {
            info!("shell exiting");
            return Ok(());
        }
    }
}

/// Feeds one message to the shell and spawns whatever work it asks for.
/// Quitting is handled by the caller once the loop ends.
fn apply(
    shell: &mut Shell,
    message: Message,
    client: &Arc<SandboxClient>,
    tx: &UnboundedSender<Message>,
) {
    let Some(effect) = shell.update(message) else {
        return;
    };
    if effect == Effect::Quit {
        return;
    }
    debug!(?effect, "dispatching");
    let client = Arc::clone(client);
    let tx = tx.clone();
    tokio::spawn(async move {
        if let Some(message) = shell::perform(client, effect).await {
            // The loop may already be gone if the user quit meanwhile.
            let _ = tx.send(message);
        }
    });
}

fn map_key(key: KeyEvent) -> Option<Key> {
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    let key = match key.code {
        KeyCode::Char('c') | KeyCode::Char('d') if ctrl => Key::Quit,
        KeyCode::Char('l') if ctrl => Key::ClearScreen,
        KeyCode::Char('u') if ctrl => Key::ClearLine,
        KeyCode::Char(_) if ctrl => return None,
        KeyCode::Char(c) => Key::Char(c),
        KeyCode::Enter => Key::Enter,
        KeyCode::Tab => Key::Tab,
        KeyCode::BackTab => Key::BackTab,
        KeyCode::Backspace => Key::Backspace,
        KeyCode::Delete => Key::Delete,
        KeyCode::Left => Key::Left,
        KeyCode::Right => Key::Right,
        KeyCode::Up => Key::Up,
        KeyCode::Down => Key::Down,
        KeyCode::Home => Key::Home,
        KeyCode::End => Key::End,
        KeyCode::PageUp => Key::PageUp,
        KeyCode::PageDown => Key::PageDown,
        KeyCode::Esc => Key::Esc,
        _ => return None,
    };
    Some(key)
}

fn map_mouse(mouse: MouseEvent) -> Option<Key> {
    match mouse.kind {
        MouseEventKind::ScrollUp => Some(Key::WheelUp),
        MouseEventKind::ScrollDown => Some(Key::WheelDown),
        _ => None,
    }
}

fn draw(frame: &mut Frame, shell: &Shell, theme: &Theme) {
    let grid_height = shell
        .completion()
        .map_or(0, |grid| u16::try_from(grid.rows()).unwrap_or(u16::MAX));
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),
            Constraint::Length(1),
            Constraint::Length(grid_height),
            Constraint::Length(1),
        ])
        .split(frame.area());

    draw_output(frame, chunks[0], shell, theme);
    draw_input(frame, chunks[1], shell, theme);
    if grid_height > 0 {
        draw_completion(frame, chunks[2], shell, theme);
    }
    frame.render_widget(Paragraph::new(KEY_HINT).style(theme.hint), chunks[3]);
}

fn draw_output(frame: &mut Frame, area: Rect, shell: &Shell, theme: &Theme) {
    let height = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = shell
        .output()
        .visible(height)
        .into_iter()
        .map(|line| theme.output_line(line))
        .collect();

    let mut title = format!(" {} ", shell.cwd());
    if shell.output().scroll_offset() > 0 {
        title.push_str(&format!("[+{}] ", shell.output().scroll_offset()));
    }
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(theme.border)
        .title(Span::styled(title, theme.title));
    frame.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_input(frame: &mut Frame, area: Rect, shell: &Shell, theme: &Theme) {
    let prompt = shell.prompt();
    let mut spans = vec![
        Span::styled(prompt.clone(), theme.prompt),
        Span::styled(shell.input().text().to_string(), theme.input),
    ];
    if shell.is_executing() {
        spans.push(Span::styled("  (running...)", theme.busy));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);

    let before_cursor = prompt.chars().count() + shell.input().cursor();
    let x = area
        .x
        .saturating_add(u16::try_from(before_cursor).unwrap_or(u16::MAX))
        .min(area.right().saturating_sub(1));
    frame.set_cursor_position((x, area.y));
}

fn draw_completion(frame: &mut Frame, area: Rect, shell: &Shell, theme: &Theme) {
    let Some(grid) = shell.completion() else {
        return;
    };
    let cell = grid
        .candidates()
        .iter()
        .map(|c| c.chars().count())
        .max()
        .unwrap_or(0)
        + 2;

    let lines: Vec<Line> = grid
        .grid_rows()
        .enumerate()
        .map(|(row, candidates)| {
            let spans: Vec<Span> = candidates
                .iter()
                .enumerate()
                .map(|(col, candidate)| {
                    let selected = row * grid.cols() + col == grid.selected();
                    Span::styled(
                        format!("{:<width$}", candidate, width = cell),
                        theme.candidate_style(candidate, selected),
                    )
                })
                .collect();
            Line::from(spans)
        })
        .collect();
    frame.render_widget(
        Paragraph::new(lines).block(Block::default().padding(Padding::horizontal(2))),
        area,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode, modifiers: KeyModifiers) -> Option<Key> {
        map_key(KeyEvent::new(code, modifiers))
    }

    #[test]
    fn control_chords_map_to_shell_actions() {
        assert_eq!(press(KeyCode::Char('c'), KeyModifiers::CONTROL), Some(Key::Quit));
        assert_eq!(press(KeyCode::Char('d'), KeyModifiers::CONTROL), Some(Key::Quit));
        assert_eq!(
            press(KeyCode::Char('l'), KeyModifiers::CONTROL),
            Some(Key::ClearScreen)
        );
        assert_eq!(
            press(KeyCode::Char('u'), KeyModifiers::CONTROL),
            Some(Key::ClearLine)
        );
        assert_eq!(press(KeyCode::Char('x'), KeyModifiers::CONTROL), None);
    }

    #[test]
    fn plain_keys_pass_through() {
        assert_eq!(press(KeyCode::Char('c'), KeyModifiers::NONE), Some(Key::Char('c')));
        assert_eq!(press(KeyCode::Char('C'), KeyModifiers::SHIFT), Some(Key::Char('C')));
        assert_eq!(press(KeyCode::BackTab, KeyModifiers::SHIFT), Some(Key::BackTab));
        assert_eq!(press(KeyCode::F(1), KeyModifiers::NONE), None);
    }
}
