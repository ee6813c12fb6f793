use courier_assist::{AssistantClient, ChatState, Message, Role};
use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, size};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Paragraph, Widget, Wrap};
use ratatui::{Frame, Terminal, TerminalOptions, Viewport};
use std::io;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

type TuiTerminal = Terminal<CrosstermBackend<io::Stdout>>;
type UiResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const INPUT_HEIGHT: u16 = 5;
const PREVIEW_HEIGHT: u16 = 5;

// Restores terminal settings even if the loop exits early.
struct TerminalGuard;

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = io::stdout().flush();
    }
}

/// One block of scrollback output.
#[derive(Debug, Clone, PartialEq)]
enum Entry {
    User(String),
    Assistant(String),
    ToolCall(String),
    ToolResult { tool: String, result: String },
    Handoff(String),
    Info(String),
}

impl Entry {
    fn from_message(message: &Message) -> Vec<Entry> {
        if message.role == Role::User {
            return vec![Entry::User(message.content.clone())];
        }

        let mut entries: Vec<Entry> = message
            .tool_calls
            .iter()
            .map(|call| Entry::ToolCall(call.tool.clone()))
            .collect();
        entries.extend(message.tool_results.iter().map(|result| Entry::ToolResult {
            tool: result.tool.clone(),
            result: result.result.to_string(),
        }));
        entries.push(Entry::Assistant(message.content.clone()));
        if let Some(handoff) = &message.handoff {
            let prefill = handoff
                .get("prefill_data")
                .map(|value| value.to_string())
                .unwrap_or_else(|| "{}".to_string());
            entries.push(Entry::Handoff(prefill));
        }
        entries
    }

    fn lines(&self) -> Vec<Line<'static>> {
        let (header, body, color) = match self {
            Entry::User(text) => ("You:".to_string(), text.clone(), Color::Blue),
            Entry::Assistant(text) => ("Assistant:".to_string(), text.clone(), Color::Yellow),
            Entry::ToolCall(tool) => (format!("tool: {}()", tool), String::new(), Color::Green),
            Entry::ToolResult { tool, result } => (
                format!("→ {} result:", tool),
                truncate(result, 300, "... [truncated]"),
                Color::Cyan,
            ),
            Entry::Handoff(prefill) => (
                "→ Opening the booking form with:".to_string(),
                prefill.clone(),
                Color::Magenta,
            ),
            Entry::Info(text) => {
                return vec![Line::from(Span::styled(
                    format!("ℹ {}", text),
                    Style::default()
                        .fg(Color::Gray)
                        .add_modifier(Modifier::ITALIC),
                ))];
            }
        };

        let header_style = Style::default().fg(color).add_modifier(Modifier::BOLD);
        let body_style = Style::default().fg(color);
        let mut lines = vec![Line::from(Span::styled(header, header_style))];
        for line in body.lines() {
            lines.push(Line::from(Span::styled(format!("  {}", line), body_style)));
        }
        lines
    }

    fn rendered_height(&self, width: u16) -> u16 {
        let width = width.max(1) as usize;
        self.lines()
            .iter()
            .map(|line| line.width().max(1).div_ceil(width))
            .sum::<usize>() as u16
    }
}

fn truncate(value: &str, max: usize, suffix: &str) -> String {
    match value.char_indices().nth(max) {
        Some((end, _)) => format!("{}{}", &value[..end], suffix),
        None => value.to_string(),
    }
}

/// Multi-line input, cursor positions counted in chars.
struct InputBuffer {
    lines: Vec<String>,
    cursor_x: usize,
    cursor_y: usize,
}

impl InputBuffer {
    fn new() -> Self {
        Self {
            lines: vec![String::new()],
            cursor_x: 0,
            cursor_y: 0,
        }
    }

    fn clear(&mut self) {
        *self = Self::new();
    }

    fn byte_index(&self) -> usize {
        let line = &self.lines[self.cursor_y];
        line.char_indices()
            .nth(self.cursor_x)
            .map(|(idx, _)| idx)
            .unwrap_or(line.len())
    }

    fn line_chars(&self) -> usize {
        self.lines[self.cursor_y].chars().count()
    }

    fn insert_char(&mut self, c: char) {
        let idx = self.byte_index();
        self.lines[self.cursor_y].insert(idx, c);
        self.cursor_x += 1;
    }

    fn delete_char(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
            let idx = self.byte_index();
            self.lines[self.cursor_y].remove(idx);
        } else if self.cursor_y > 0 {
            let removed = self.lines.remove(self.cursor_y);
            self.cursor_y -= 1;
            self.cursor_x = self.line_chars();
            self.lines[self.cursor_y].push_str(&removed);
        }
    }

    fn new_line(&mut self) {
        let idx = self.byte_index();
        let rest = self.lines[self.cursor_y].split_off(idx);
        self.lines.insert(self.cursor_y + 1, rest);
        self.cursor_y += 1;
        self.cursor_x = 0;
    }

    fn move_left(&mut self) {
        if self.cursor_x > 0 {
            self.cursor_x -= 1;
        } else if self.cursor_y > 0 {
            self.cursor_y -= 1;
            self.cursor_x = self.line_chars();
        }
    }

    fn move_right(&mut self) {
        if self.cursor_x < self.line_chars() {
            self.cursor_x += 1;
        } else if self.cursor_y + 1 < self.lines.len() {
            self.cursor_y += 1;
            self.cursor_x = 0;
        }
    }

    fn text(&self) -> String {
        self.lines.join("\n")
    }

    fn is_blank(&self) -> bool {
        self.lines.iter().all(|l| l.trim().is_empty())
    }

    fn render(&self) -> Text<'static> {
        if self.lines.iter().all(String::is_empty) {
            return Text::from(Span::styled(
                "Ask about a delivery, a quote or a booking...",
                Style::default().fg(Color::DarkGray),
            ));
        }
        Text::from(self.lines.iter().cloned().map(Line::from).collect::<Vec<_>>())
    }
}

struct App {
    client: Arc<AssistantClient>,
    state: watch::Receiver<ChatState>,
    input: InputBuffer,
    // Messages already written to scrollback.
    printed: usize,
    reported_error: Option<String>,
    should_quit: bool,
}

impl App {
    fn new(client: Arc<AssistantClient>) -> Self {
        let state = client.watch();
        Self {
            client,
            state,
            input: InputBuffer::new(),
            printed: 0,
            reported_error: None,
            should_quit: false,
        }
    }

    fn draw(&self, f: &mut Frame) {
        let state = self.state.borrow().clone();
        let [preview_area, input_area] =
            Layout::vertical([Constraint::Min(1), Constraint::Length(INPUT_HEIGHT)])
                .areas(f.area());

        if let Some(active) = state.active_message() {
            let mut lines = vec![Line::from(Span::styled(
                "Assistant (typing, Esc to stop):",
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD),
            ))];
            let tail: Vec<&str> = active.content.lines().collect();
            let keep = (preview_area.height as usize).saturating_sub(1);
            for line in &tail[tail.len().saturating_sub(keep)..] {
                lines.push(Line::from(Span::styled(
                    format!("  {}", line),
                    Style::default().fg(Color::Yellow),
                )));
            }
            f.render_widget(
                Paragraph::new(Text::from(lines)).wrap(Wrap { trim: false }),
                preview_area,
            );
        }

        let title = if state.is_streaming() {
            " Message (Esc to stop, Ctrl+L new conversation) [Streaming...] "
        } else {
            " Message (Enter to send, Ctrl+L new conversation, Esc to quit) "
        };
        let input = Paragraph::new(self.input.render())
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(title)
                    .border_style(Style::default().fg(Color::DarkGray)),
            )
            .wrap(Wrap { trim: false });
        f.render_widget(input, input_area);

        let x = (input_area.x + 1 + self.input.cursor_x as u16)
            .min(input_area.x + input_area.width.saturating_sub(2));
        let y = (input_area.y + 1 + self.input.cursor_y as u16)
            .min(input_area.y + input_area.height.saturating_sub(2));
        f.set_cursor_position((x, y));
    }

    fn append(&mut self, terminal: &mut TuiTerminal, entry: Entry) -> UiResult<()> {
        let width = terminal.size()?.width;
        let height = entry.rendered_height(width).saturating_add(1);
        let mut text = Text::from(entry.lines());
        text.extend(Text::raw("\n"));
        // Insert above the inline viewport so the log stays in scrollback.
        terminal.insert_before(height, |buf| {
            Paragraph::new(text)
                .wrap(Wrap { trim: false })
                .render(buf.area, buf);
        })?;
        Ok(())
    }

    /// Writes messages that can no longer change to scrollback.
    fn flush_finished(&mut self, terminal: &mut TuiTerminal) -> UiResult<()> {
        let state = self.state.borrow_and_update().clone();
        let messages = state.messages();
        let settled = match state.active_message() {
            Some(active) => messages
                .iter()
                .position(|m| m.id == active.id)
                .unwrap_or(messages.len()),
            None => messages.len(),
        };
        if self.printed > messages.len() {
            self.printed = 0;
        }

        while self.printed < settled {
            for entry in Entry::from_message(&messages[self.printed]) {
                self.append(terminal, entry)?;
            }
            self.printed += 1;
        }

        if !state.is_streaming() {
            let error = state.error().map(str::to_string);
            let shown_inline = messages
                .last()
                .is_some_and(|m| Some(m.content.as_str()) == error.as_deref());
            if error.is_some() && error != self.reported_error && !shown_inline {
                self.append(
                    terminal,
                    Entry::Info(format!("Error: {}", error.clone().unwrap_or_default())),
                )?;
            }
            self.reported_error = error;
        }
        Ok(())
    }

    fn submit(&mut self) {
        if self.input.is_blank() || self.client.is_streaming() {
            return;
        }
        let text = self.input.text();
        self.input.clear();

        let client = Arc::clone(&self.client);
        tokio::spawn(async move {
            if let Err(err) = client.send_message(&text).await {
                tracing::debug!(error = %err, "turn ended with an error");
            }
        });
    }

    fn handle_events(&mut self, terminal: &mut TuiTerminal) -> UiResult<bool> {
        self.flush_finished(terminal)?;

        if !event::poll(Duration::from_millis(50))? {
            return Ok(true);
        }
        let Event::Key(key) = event::read()? else {
            return Ok(true);
        };

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Char('c') if ctrl => {
                self.client.cancel();
                self.should_quit = true;
                return Ok(false);
            }
            KeyCode::Char('l') if ctrl => {
                self.client.clear_messages();
                self.printed = 0;
                self.reported_error = None;
                self.append(terminal, Entry::Info("Started a new conversation".to_string()))?;
            }
            KeyCode::Esc => {
                if self.client.is_streaming() {
                    self.client.cancel();
                } else {
                    self.should_quit = true;
                    return Ok(false);
                }
            }
            KeyCode::Enter if key.modifiers.contains(KeyModifiers::SHIFT) => self.input.new_line(),
            KeyCode::Enter => self.submit(),
            KeyCode::Char(c) => self.input.insert_char(c),
            KeyCode::Backspace => self.input.delete_char(),
            KeyCode::Left => self.input.move_left(),
            KeyCode::Right => self.input.move_right(),
            KeyCode::Home => self.input.cursor_x = 0,
            KeyCode::End => self.input.cursor_x = self.input.line_chars(),
            _ => {}
        }

        Ok(true)
    }
}

pub fn run_tui(client: Arc<AssistantClient>) -> UiResult<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    let (_, rows) = size()?;
    if rows > 0 {
        // Push existing screen content into scrollback without clearing it.
        for _ in 0..rows {
            writeln!(stdout)?;
        }
        stdout.flush()?;
    }
    execute!(stdout, MoveTo(0, 0))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::with_options(
        backend,
        TerminalOptions {
            viewport: Viewport::Inline(INPUT_HEIGHT + PREVIEW_HEIGHT),
        },
    )?;

    let mut app = App::new(client);
    let _guard = TerminalGuard;

    terminal.draw(|f| app.draw(f))?;

    while !app.should_quit {
        if !app.handle_events(&mut terminal)? {
            break;
        }

        terminal.draw(|f| app.draw(f))?;
    }

    Ok(())
}
