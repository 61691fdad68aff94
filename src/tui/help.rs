use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

const KEYS: &[(&str, &str)] = &[
    ("s", "Start ComfyUI"),
    ("x", "Stop ComfyUI"),
    ("b", "Open companion window"),
    ("c", "Close companion window"),
    ("i", "Install dependencies"),
    ("d", "Select ComfyUI folder"),
    ("v", "Validate folder"),
    ("w", "Save configuration"),
    ("y", "Copy web UI URL to clipboard"),
    ("tab", "Switch server/install output"),
    ("?", "Show this help"),
];

const EDIT_KEYS: &[(&str, &str)] = &[
    ("↑/↓ j/k", "Select field"),
    ("enter", "Toggle flag or edit value"),
    ("esc", "Cancel editing"),
];

fn key_line(key: &str, what: &str) -> Line<'static> {
    Line::from(vec![
        Span::raw("  "),
        Span::styled(format!("{key:<10}"), Style::default().fg(Color::Magenta)),
        Span::raw(what.to_string()),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let mut lines = vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            Span::styled("q", Style::default().fg(Color::Magenta)),
            Span::raw(" / "),
            Span::styled("Ctrl-C", Style::default().fg(Color::Magenta)),
            Span::raw("  Quit (stops ComfyUI)"),
        ]),
    ];
    lines.extend(KEYS.iter().map(|(k, w)| key_line(k, w)));
    lines.push(Line::from(""));
    lines.push(Line::from("Configuration:"));
    lines.extend(EDIT_KEYS.iter().map(|(k, w)| key_line(k, w)));
    lines.push(Line::from(""));
    lines.push(Line::from(vec![
        Span::raw("Logs: "),
        Span::styled(
            crate::logging::log_file_path().display().to_string(),
            Style::default().fg(Color::Cyan),
        ),
    ]));

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(Clear, area);
    f.render_widget(p, area);
}
