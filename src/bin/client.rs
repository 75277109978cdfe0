use std::io;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::{SinkExt, StreamExt};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame, Terminal,
};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use chat::protocol::split_timestamp;

// ─── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "client", about = "Terminal client for the broadcast chat")]
struct Args {
    #[arg(long, default_value = "localhost:8000")]
    addr: String,

    /// Name announced to the room
    #[arg(long)]
    name: String,
}

// ─── Simple one-line text input ───────────────────────────────────────────────

#[derive(Default, Clone)]
struct Input {
    value: String,
    cursor: usize,
}

impl Input {
    fn insert(&mut self, ch: char) {
        self.value.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
    }

    fn delete_back(&mut self) {
        if self.cursor == 0 {
            return;
        }
        // find previous char boundary
        let mut prev = self.cursor - 1;
        while prev > 0 && !self.value.is_char_boundary(prev) {
            prev -= 1;
        }
        self.value.drain(prev..self.cursor);
        self.cursor = prev;
    }

    fn take(&mut self) -> String {
        self.cursor = 0;
        std::mem::take(&mut self.value)
    }

    fn as_str(&self) -> &str {
        &self.value
    }

    /// Cursor column in cells, for placing the terminal cursor.
    fn column(&self) -> u16 {
        self.value[..self.cursor].chars().count() as u16
    }
}

// ─── App state ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ChatLine {
    timestamp: String,
    content: String,
    is_notice: bool,
}

impl ChatLine {
    fn from_wire(raw: &str) -> Self {
        let (stamp, rest) = split_timestamp(raw);
        Self {
            timestamp: stamp
                .map(|at| at.format("%H:%M:%S").to_string())
                .unwrap_or_default(),
            content: rest.to_string(),
            is_notice: is_notice(rest),
        }
    }

    fn local(content: &str) -> Self {
        Self {
            timestamp: String::new(),
            content: content.to_string(),
            is_notice: true,
        }
    }
}

fn is_notice(rest: &str) -> bool {
    !rest.contains(": ") && (rest.ends_with(" enters the chat") || rest.ends_with(" left the chat"))
}

struct App {
    name: String,
    addr: String,
    connected: bool,

    messages: Vec<ChatLine>,
    input: Input,
    scroll: usize, // how many lines from the bottom we are scrolled
    viewport_height: u16,

    quit: bool,
}

impl App {
    fn new(name: String, addr: String) -> Self {
        Self {
            name,
            addr,
            connected: true,
            messages: Vec::new(),
            input: Input::default(),
            scroll: 0,
            viewport_height: 20,
            quit: false,
        }
    }

    fn push_message(&mut self, line: ChatLine) {
        self.messages.push(line);
        // keep the view anchored when scrolled back
        if self.scroll > 0 {
            self.scroll += 1;
        }
    }

    fn scroll_up(&mut self) {
        let max = self.messages.len().saturating_sub(self.viewport_height as usize);
        self.scroll = (self.scroll + 3).min(max);
    }

    fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(3);
    }
}

// ─── Network message types (from server → TUI) ───────────────────────────────

enum NetMsg {
    Line(String),
    Disconnected,
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    if !valid_name(&args.name) {
        bail!("name must be non-empty and use only letters, digits, '-', '_' or '.'");
    }

    let url = format!("ws://{}/ws/{}", args.addr, args.name);
    let (socket, _) = connect_async(url.as_str()).await?;
    let (mut sink, mut stream) = socket.split();

    // Channel: server → UI
    let (net_tx, mut net_rx) = mpsc::channel::<NetMsg>(128);
    // Channel: UI → server writer
    let (write_tx, mut write_rx) = mpsc::channel::<String>(64);

    // Spawn reader task
    tokio::spawn(async move {
        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if net_tx.send(NetMsg::Line(text.as_str().to_owned())).await.is_err() {
                        return;
                    }
                }
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
        net_tx.send(NetMsg::Disconnected).await.ok();
    });

    // Spawn writer task
    tokio::spawn(async move {
        while let Some(text) = write_rx.recv().await {
            if sink.send(Message::text(text)).await.is_err() {
                break;
            }
        }
        sink.close().await.ok();
    });

    // Set up terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(args.name, args.addr);
    let result = run_app(&mut terminal, &mut app, &mut net_rx, &write_tx).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    net_rx: &mut mpsc::Receiver<NetMsg>,
    write_tx: &mpsc::Sender<String>,
) -> Result<()> {
    loop {
        // Draw
        let size = terminal.size()?;
        app.viewport_height = size.height.saturating_sub(5);
        terminal.draw(|f| draw(f, app))?;

        // Poll keyboard (non-blocking, 20ms)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(key) = event::read()? {
                handle_key(app, key, write_tx).await;
            }
        }

        // Drain all pending network messages
        while let Ok(msg) = net_rx.try_recv() {
            handle_net(app, msg);
        }

        if app.quit {
            break;
        }
    }
    Ok(())
}

// ─── Key handling ─────────────────────────────────────────────────────────────

async fn handle_key(app: &mut App, key: KeyEvent, write_tx: &mpsc::Sender<String>) {
    match key.code {
        KeyCode::Char('c') | KeyCode::Char('q') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            app.quit = true;
        }
        KeyCode::PageUp => app.scroll_up(),
        KeyCode::PageDown => app.scroll_down(),
        KeyCode::Enter => {
            if !app.connected || app.input.as_str().trim().is_empty() {
                return;
            }
            let text = app.input.take();
            write_tx.send(text).await.ok();
        }
        KeyCode::Backspace => app.input.delete_back(),
        KeyCode::Char(c) => app.input.insert(c),
        _ => {}
    }
}

// ─── Network message handling ─────────────────────────────────────────────────

fn handle_net(app: &mut App, msg: NetMsg) {
    match msg {
        NetMsg::Line(raw) => app.push_message(ChatLine::from_wire(&raw)),
        NetMsg::Disconnected => {
            app.connected = false;
            app.push_message(ChatLine::local("Disconnected from server."));
        }
    }
}

// ─── Drawing ─────────────────────────────────────────────────────────────────

fn draw(f: &mut Frame, app: &App) {
    let area = f.area();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // header
            Constraint::Min(3),    // messages
            Constraint::Length(3), // input
        ])
        .split(area);

    // Header
    let status = if app.connected { "connected" } else { "offline" };
    let header = Paragraph::new(format!(
        " {} @ {}  │  {}  │  PgUp/PgDn scroll  │  Ctrl+Q quit ",
        app.name, app.addr, status
    ))
    .style(
        Style::default()
            .bg(Color::DarkGray)
            .fg(Color::White)
            .add_modifier(Modifier::BOLD),
    );
    f.render_widget(header, chunks[0]);

    // Messages viewport
    let msg_block = Block::default()
        .borders(Borders::LEFT | Borders::RIGHT | Borders::TOP)
        .border_style(Style::default().fg(Color::DarkGray));
    let msg_inner = msg_block.inner(chunks[1]);
    f.render_widget(msg_block, chunks[1]);

    let height = msg_inner.height as usize;
    let total = app.messages.len();
    let end = total.saturating_sub(app.scroll);
    let start = end.saturating_sub(height);
    let visible = &app.messages[start..end];

    let items: Vec<ListItem> = visible.iter().map(render_line).collect();
    f.render_widget(List::new(items), msg_inner);

    // Input box
    let input_block = Block::default()
        .title(" Message (Enter to send) ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));
    let input_inner = input_block.inner(chunks[2]);
    f.render_widget(input_block, chunks[2]);

    let input_widget =
        Paragraph::new(app.input.as_str()).style(Style::default().fg(Color::White));
    f.render_widget(input_widget, input_inner);

    f.set_cursor_position((input_inner.x + app.input.column(), input_inner.y));
}

fn render_line(line: &ChatLine) -> ListItem<'static> {
    let stamp = Span::styled(
        if line.timestamp.is_empty() {
            String::new()
        } else {
            format!("[{}] ", line.timestamp)
        },
        Style::default().fg(Color::DarkGray),
    );

    if line.is_notice {
        return ListItem::new(Line::from(vec![
            stamp,
            Span::styled(
                format!("◆ {}", line.content),
                Style::default()
                    .fg(Color::DarkGray)
                    .add_modifier(Modifier::ITALIC),
            ),
        ]));
    }

    match line.content.split_once(": ") {
        Some((name, body)) => ListItem::new(Line::from(vec![
            stamp,
            Span::styled(
                format!("{}: ", name),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw(body.to_string()),
        ])),
        None => ListItem::new(Line::from(vec![stamp, Span::raw(line.content.clone())])),
    }
}
