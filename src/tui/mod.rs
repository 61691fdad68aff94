mod fields;
mod help;
mod state;

use crate::cli::{build_launcher, Cli};
use crate::config::ConfigStore;
use crate::dialogs::{self, RfdDialogs};
use crate::model::Operation;
use crate::orchestrator::LauncherClient;
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use fields::{FieldKind, FIELDS};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Tabs},
    Terminal,
};
use state::{UiMsg, UiState};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Issues operations from the UI thread without blocking it.
struct Requests {
    client: LauncherClient,
    runtime: tokio::runtime::Handle,
    replies: UnboundedSender<UiMsg>,
}

impl Requests {
    fn send(&self, op: Operation) {
        let client = self.client.clone();
        let replies = self.replies.clone();
        let name = op.name();
        self.runtime.spawn(async move {
            let result = client.call(op).await.map_err(|e| format!("{e:#}"));
            let _ = replies.send(UiMsg::Reply { op: name, result });
        });
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let store = ConfigStore::new(&args.config);
    let initial = store.load();

    let (notify_tx, mut notify_rx) = mpsc::unbounded_channel();
    let (client, controller) = LauncherClient::spawn(build_launcher(&args, notify_tx.clone()));

    // Notifications and replies reach the UI thread on one channel.
    let (ui_tx, ui_rx) = mpsc::unbounded_channel::<UiMsg>();
    let fwd = ui_tx.clone();
    tokio::spawn(async move {
        while let Some(ev) = notify_rx.recv().await {
            if fwd.send(UiMsg::Event(ev)).is_err() {
                break;
            }
        }
    });

    if initial.comfyui_path.is_empty() {
        tokio::spawn(async move {
            dialogs::first_run(&RfdDialogs, &store, &notify_tx).await;
        });
    }

    let requests = Requests {
        client: client.clone(),
        runtime: tokio::runtime::Handle::current(),
        replies: ui_tx,
    };
    let start_on_launch = args.start_on_launch;

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_handle =
        std::thread::spawn(move || run_threaded(initial, start_on_launch, requests, ui_rx));
    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;

    // Stops ComfyUI and closes the companion before returning.
    client.shutdown();
    controller.await.context("launcher controller panicked")?;

    match join_res {
        Ok(Ok(res)) => res,
        Ok(Err(_)) => Err(anyhow::anyhow!("TUI thread panicked")),
        Err(e) => Err(anyhow::anyhow!("TUI join failed: {e}")),
    }
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    config: crate::model::LaunchConfig,
    start_on_launch: bool,
    requests: Requests,
    mut ui_rx: UnboundedReceiver<UiMsg>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let mut state = UiState::new(config);
    if !state.config.comfyui_path.is_empty() {
        requests.send(Operation::ValidatePath(state.config.comfyui_path.clone()));
    }
    if start_on_launch {
        requests.send(Operation::StartComfyui(Box::new(state.config.clone())));
    }

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain without blocking to keep the UI responsive.
        while let Ok(msg) = ui_rx.try_recv() {
            let follow_up = match msg {
                UiMsg::Event(ev) => state.apply_event(ev),
                UiMsg::Reply { op, result } => state.apply_reply(op, result),
            };
            if let Some(op) = follow_up {
                requests.send(op);
            }
        }

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                if state.editing.is_some() {
                    handle_edit_key(&mut state, k);
                    continue;
                }
                if handle_key(&mut state, &requests, k) {
                    break Ok(());
                }
            }
        }
    };

    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();
    res
}

/// Returns `true` when the user asked to quit.
fn handle_key(state: &mut UiState, requests: &Requests, k: KeyEvent) -> bool {
    match (k.modifiers, k.code) {
        (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => return true,
        (_, KeyCode::Char('s')) => {
            state.info = "Starting ComfyUI…".into();
            requests.send(Operation::StartComfyui(Box::new(state.config.clone())));
        }
        (_, KeyCode::Char('x')) => requests.send(Operation::StopComfyui),
        (_, KeyCode::Char('b')) => {
            requests.send(Operation::OpenComfyuiBrowser(Box::new(state.config.clone())))
        }
        (_, KeyCode::Char('c')) => requests.send(Operation::CloseComfyuiBrowser),
        (_, KeyCode::Char('i')) => {
            if state.installing {
                state.info = "Installation already in progress".into();
            } else {
                state.installing = true;
                state.tab = 1;
                state.install_output.clear();
                state.info = "Installing dependencies…".into();
                requests.send(Operation::InstallDependencies(Box::new(state.config.clone())));
            }
        }
        (_, KeyCode::Char('d')) => requests.send(Operation::SelectDirectory),
        (_, KeyCode::Char('v')) => {
            requests.send(Operation::ValidatePath(state.config.comfyui_path.clone()))
        }
        (_, KeyCode::Char('w')) => {
            requests.send(Operation::SaveConfig(Box::new(state.config.clone())))
        }
        (_, KeyCode::Char('y')) => {
            let url = state.config.web_ui_url();
            state.info = match copy_to_clipboard(&url) {
                Ok(()) => format!("Copied {url}"),
                Err(e) => format!("Clipboard unavailable: {e:#}"),
            };
        }
        (_, KeyCode::Char('?')) => state.show_help = !state.show_help,
        (_, KeyCode::Tab) => state.tab = (state.tab + 1) % 2,
        (_, KeyCode::Up) | (_, KeyCode::Char('k')) => {
            state.selected = state.selected.saturating_sub(1);
        }
        (_, KeyCode::Down) | (_, KeyCode::Char('j')) => {
            state.selected = (state.selected + 1).min(FIELDS.len() - 1);
        }
        (_, KeyCode::Enter) | (_, KeyCode::Char(' ')) => {
            let field = FIELDS[state.selected];
            if field.kind == FieldKind::Flag {
                if let Some(v) = fields::toggle(&mut state.config, field.key) {
                    state.info = format!("{}: {} (w to save)", field.label, if v { "on" } else { "off" });
                }
            } else {
                state.editing = Some(fields::raw_value(&state.config, field.key));
            }
        }
        (_, KeyCode::Esc) => state.show_help = false,
        _ => {}
    }
    false
}

fn handle_edit_key(state: &mut UiState, k: KeyEvent) {
    let Some(buf) = state.editing.as_mut() else {
        return;
    };
    match k.code {
        KeyCode::Char(c) => buf.push(c),
        KeyCode::Backspace => {
            buf.pop();
        }
        KeyCode::Esc => state.editing = None,
        KeyCode::Enter => {
            let field = FIELDS[state.selected];
            let value = state.editing.take().unwrap_or_default();
            state.info = match fields::set_value(&mut state.config, field.key, &value) {
                Ok(()) => format!("{} updated (w to save)", field.label),
                Err(e) => format!("✗ {e}"),
            };
        }
        _ => {}
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(5),
            Constraint::Min(8),
            Constraint::Length(1),
        ])
        .split(area);

    draw_status(rows[0], f, state);

    let main = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(rows[1]);
    draw_config(main[0], f, state);
    draw_output(main[1], f, state);

    let footer = if state.info.is_empty() {
        "s start · x stop · b/c window · i install · w save · ? help · q quit".to_string()
    } else {
        state.info.clone()
    };
    f.render_widget(
        Paragraph::new(footer).style(Style::default().fg(Color::Gray)),
        rows[2],
    );

    if state.show_help {
        help::draw_help(rows[1], f);
    }
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let server = if state.running {
        let pid = state.pid.map(|p| format!(" (pid {p})")).unwrap_or_default();
        Span::styled(format!("running{pid}"), Style::default().fg(Color::Green))
    } else {
        Span::styled("stopped", Style::default().fg(Color::Red))
    };
    let window = if state.browser_open {
        Span::styled("open", Style::default().fg(Color::Green))
    } else {
        Span::styled("closed", Style::default().fg(Color::DarkGray))
    };
    let install = match &state.validation {
        Some(v) if v.valid => {
            let layout = v
                .python_type
                .map(|t| format!(" ({t:?})").to_lowercase())
                .unwrap_or_default();
            Span::styled(format!("valid{layout}"), Style::default().fg(Color::Green))
        }
        Some(v) => Span::styled(
            format!("missing {}", v.missing.join(", ")),
            Style::default().fg(Color::Yellow),
        ),
        None => Span::styled("not checked", Style::default().fg(Color::DarkGray)),
    };
    let label = |s: &'static str| Span::styled(s, Style::default().fg(Color::Gray));

    let lines = vec![
        Line::from(vec![label("ComfyUI:   "), server]),
        Line::from(vec![label("Window:    "), window]),
        Line::from(vec![
            label("URL:       "),
            Span::styled(state.config.web_ui_url(), Style::default().fg(Color::Cyan)),
        ]),
    ];
    let left = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("ComfyUI Launcher"),
    );

    let path = if state.config.comfyui_path.is_empty() {
        "(not set, press d)".to_string()
    } else {
        state.config.comfyui_path.clone()
    };
    let right = Paragraph::new(vec![
        Line::from(vec![label("Folder:    "), Span::raw(path)]),
        Line::from(vec![label("Install:   "), install]),
        Line::from(vec![
            label("Deps:      "),
            Span::raw(if state.installing { "installing…" } else { "idle" }),
        ]),
    ])
    .block(Block::default().borders(Borders::ALL).title("Installation"));

    let cols = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);
    f.render_widget(left, cols[0]);
    f.render_widget(right, cols[1]);
}

fn draw_config(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let visible = area.height.saturating_sub(2) as usize;
    // Keep the selection on screen.
    let offset = state.selected.saturating_sub(visible.saturating_sub(1));

    let lines: Vec<Line> = FIELDS
        .iter()
        .enumerate()
        .skip(offset)
        .take(visible)
        .map(|(i, field)| {
            let selected = i == state.selected;
            let value = match (&state.editing, selected) {
                (Some(buf), true) => format!("{buf}▏"),
                _ => fields::display_value(&state.config, field),
            };
            let style = if selected {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                Style::default()
            };
            Line::from(vec![
                Span::styled(format!("{:<24}", field.label), style),
                Span::raw(" "),
                Span::raw(value),
            ])
        })
        .collect();

    let title = if state.editing.is_some() {
        "Configuration (enter save · esc cancel)"
    } else {
        "Configuration"
    };
    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(title)),
        area,
    );
}

fn draw_output(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Min(1)])
        .split(area);

    let tabs = Tabs::new(vec!["Server output", "Install output"])
        .select(state.tab)
        .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    let log = if state.tab == 0 {
        &state.output
    } else {
        &state.install_output
    };
    let lines: Vec<Line> = log
        .tail(chunks[1].height.saturating_sub(2) as usize)
        .into_iter()
        .map(|l| Line::from(l.to_string()))
        .collect();
    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL)),
        chunks[1],
    );
}

// Global clipboard manager channel - initialized once on first use
use std::sync::mpsc as std_mpsc;
use std::sync::OnceLock;

static CLIPBOARD_SENDER: OnceLock<std_mpsc::Sender<String>> = OnceLock::new();

/// Start the clipboard thread if not already running.
/// Each clipboard instance is kept alive for a while so clipboard managers
/// on Linux can read the contents.
fn init_clipboard_manager() -> &'static std_mpsc::Sender<String> {
    CLIPBOARD_SENDER.get_or_init(|| {
        let (tx, rx) = std_mpsc::channel::<String>();
        std::thread::spawn(move || {
            use arboard::Clipboard;

            for text in rx {
                match Clipboard::new() {
                    Ok(mut clipboard) => {
                        if clipboard.set_text(&text).is_ok() {
                            std::thread::sleep(Duration::from_secs(2));
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "clipboard unavailable"),
                }
            }
        });
        tx
    })
}

fn copy_to_clipboard(text: &str) -> Result<()> {
    init_clipboard_manager()
        .send(text.to_string())
        .map_err(|_| anyhow::anyhow!("Clipboard manager channel closed"))
}
