use ratatui::{
    layout::Rect,
    style::Color,
    style::Style,
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame,
};

fn key(k: &str) -> Span<'_> {
    Span::styled(k, Style::default().fg(Color::Magenta))
}

/// One-line key hints for the header.
pub fn key_hints() -> Line<'static> {
    Line::from(vec![
        Span::styled("Keys: ", Style::default().fg(Color::Gray)),
        key("q"),
        Span::raw(" detach  "),
        key("c"),
        Span::raw(" cancel run  "),
        key("r"),
        Span::raw(" refresh  "),
        key("?"),
        Span::raw(" help"),
    ])
}

pub fn draw_help(area: Rect, f: &mut Frame) {
    let p = Paragraph::new(vec![
        Line::from("Keybinds:"),
        Line::from(vec![
            Span::raw("  "),
            key("q"),
            Span::raw(" / "),
            key("Ctrl-C"),
            Span::raw("  Leave the dashboard (the run keeps going)"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            key("c"),
            Span::raw("           Interrupt CP2K (SIGINT)"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            key("r"),
            Span::raw("           Re-read the snapshot now"),
        ]),
        Line::from(vec![
            Span::raw("  "),
            key("?"),
            Span::raw("           Toggle this help"),
        ]),
    ])
    .block(Block::default().borders(Borders::ALL).title("Help"));
    f.render_widget(Clear, area);
    f.render_widget(p, area);
}
