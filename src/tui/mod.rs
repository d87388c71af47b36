//! Full-screen terminal dashboard.
//!
//! Runs on its own OS thread and only talks to the rest of the program through a
//! [`SnapshotSource`] and a [`CancelRelay`].

mod charts;
mod help;
mod state;

use crate::dashboard::table::{self, block_rows, metric_rows, populated_columns};
use crate::dashboard::{CancelRelay, SnapshotSource};
use crate::logging;
use crate::model::{Field, Snapshot};
use crate::text_summary::format_runtime;
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Row, Table},
    Terminal,
};
use state::UiState;
use std::{io, time::Duration};

pub struct TuiOptions {
    pub title: String,
    /// Pre-rendered input file; when `None` the path in the snapshot is used.
    pub input_lines: Option<Vec<String>>,
    pub redraw: Duration,
    pub grace: Duration,
    pub show_blocks: bool,
    pub waiting: Option<String>,
}

/// Run the dashboard on a dedicated thread and wait for it without blocking the runtime.
pub async fn run<S, C>(source: S, relay: C, opts: TuiOptions) -> Result<()>
where
    S: SnapshotSource + Send + 'static,
    C: CancelRelay + Send + 'static,
{
    let ui_handle = std::thread::spawn(move || run_threaded(source, relay, opts));
    match tokio::task::spawn_blocking(move || ui_handle.join()).await {
        Ok(Ok(res)) => res,
        Ok(Err(_)) => Err(anyhow::anyhow!("dashboard thread panicked")),
        Err(e) => Err(e).context("join dashboard thread"),
    }
}

/// Run the dashboard loop on the calling thread until the user leaves or, for sources
/// that ask for it, the run has ended and the grace period is over.
pub fn run_threaded<S, C>(mut source: S, relay: C, opts: TuiOptions) -> Result<()>
where
    S: SnapshotSource,
    C: CancelRelay,
{
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();
    logging::set_terminal_owned(true);

    let res = Terminal::new(CrosstermBackend::new(stdout))
        .context("create terminal")
        .and_then(|mut terminal| {
            terminal.clear().ok();
            event_loop(&mut terminal, &mut source, &relay, opts)
        });

    logging::set_terminal_owned(false);
    disable_raw_mode().ok();
    execute!(io::stdout(), LeaveAlternateScreen).ok();
    res
}

fn event_loop<B, S, C>(
    terminal: &mut Terminal<B>,
    source: &mut S,
    relay: &C,
    opts: TuiOptions,
) -> Result<()>
where
    B: Backend,
    S: SnapshotSource,
    C: CancelRelay,
{
    let mut ui = UiState::new(opts.title);
    ui.show_blocks = opts.show_blocks;
    ui.input_lines = opts.input_lines;
    if let Some(waiting) = opts.waiting {
        ui.waiting = waiting;
    }

    loop {
        let snap = source.current();
        ui.observe(snap.as_ref());
        terminal
            .draw(|f| draw(f.area(), f, &ui, snap.as_ref()))
            .context("draw dashboard")?;

        if source.exits_when_finished() {
            if let Some(t) = ui.finished_at {
                if t.elapsed() >= opts.grace {
                    return Ok(());
                }
            }
        }

        // The poll timeout doubles as the redraw period.
        if event::poll(opts.redraw).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match (k.modifiers, k.code) {
                    (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        return Ok(());
                    }
                    (_, KeyCode::Char('c')) => {
                        ui.info = relay.cancel(snap.as_ref());
                    }
                    (_, KeyCode::Char('r')) => {
                        source.refresh();
                        ui.info = "Refreshed".into();
                    }
                    (_, KeyCode::Char('?')) => {
                        ui.show_help = !ui.show_help;
                    }
                    (_, KeyCode::Esc) => {
                        ui.show_help = false;
                    }
                    _ => {}
                }
            }
        }
    }
}

fn draw(area: Rect, f: &mut ratatui::Frame, ui: &UiState, snap: Option<&Snapshot>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(6), Constraint::Min(0)].as_ref())
        .split(area);

    draw_header(chunks[0], f, ui, snap);

    match snap {
        Some(snap) => draw_body(chunks[1], f, ui, snap),
        None => f.render_widget(
            Paragraph::new(ui.waiting.as_str())
                .block(Block::default().borders(Borders::ALL).title("Run")),
            chunks[1],
        ),
    }

    if ui.show_help {
        let w = area.width.min(60);
        let h = area.height.min(9);
        let popup = Rect {
            x: area.x + (area.width - w) / 2,
            y: area.y + (area.height - h) / 2,
            width: w,
            height: h,
        };
        help::draw_help(popup, f);
    }
}

fn kv<'a>(label: &'a str, value: String) -> [Span<'a>; 2] {
    [
        Span::styled(label, Style::default().fg(Color::Gray)),
        Span::raw(value),
    ]
}

fn status_color(snap: &Snapshot) -> Color {
    match snap.status {
        Some(crate::model::RunStatus::Completed) => Color::Green,
        Some(crate::model::RunStatus::Failed(_)) => Color::Red,
        Some(_) => Color::Yellow,
        None => Color::Gray,
    }
}

fn draw_header(area: Rect, f: &mut ratatui::Frame, ui: &UiState, snap: Option<&Snapshot>) {
    let mut lines = Vec::with_capacity(4);
    if let Some(s) = snap {
        let dash = |v: Option<&str>| v.unwrap_or("-").to_string();
        let mut first = Vec::new();
        first.extend(kv("Project: ", s.project.clone()));
        first.extend(kv("  Mode: ", dash(s.mode.as_deref())));
        first.extend(kv("  Profile: ", dash(s.profile.as_deref())));
        lines.push(Line::from(first));

        let status = s
            .status
            .map(|st| st.to_string())
            .unwrap_or_else(|| "unknown".into());
        let mut second = vec![
            Span::styled("Status: ", Style::default().fg(Color::Gray)),
            Span::styled(
                status,
                Style::default()
                    .fg(status_color(s))
                    .add_modifier(Modifier::BOLD),
            ),
        ];
        second.extend(kv("  Runtime: ", format_runtime(s.runtime_seconds)));
        second.extend(kv(
            "  PID: ",
            s.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into()),
        ));
        lines.push(Line::from(second));

        let mut third = Vec::new();
        third.extend(kv("Log: ", s.logfile.clone()));
        third.extend(kv("  Input: ", dash(s.input_path.as_deref())));
        lines.push(Line::from(third));
    } else {
        lines.push(Line::from(""));
        lines.push(Line::from(""));
        lines.push(Line::from(""));
    }
    let mut hints = help::key_hints();
    if !ui.info.is_empty() {
        hints.spans.push(Span::raw("  "));
        hints
            .spans
            .push(Span::styled(ui.info.clone(), Style::default().fg(Color::Yellow)));
    }
    lines.push(hints);

    f.render_widget(
        Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title(ui.title.as_str()),
        ),
        area,
    );
}

fn draw_body(area: Rect, f: &mut ratatui::Frame, ui: &UiState, snap: &Snapshot) {
    let input_lines: &[String] = ui.input_lines.as_deref().unwrap_or(&[]);
    let input_h = (input_lines.len() as u16 + 2).clamp(3, (area.height / 4).max(6));
    let metrics_h = 16u16;
    let rows = block_rows(snap);
    let blocks_h = if ui.show_blocks {
        blocks_height(rows.len())
    } else {
        0
    };

    let main = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(input_h),
                Constraint::Length(metrics_h),
                Constraint::Length(blocks_h),
                Constraint::Min(3),
            ]
            .as_ref(),
        )
        .split(area);

    let input: Vec<Line> = input_lines
        .iter()
        .map(|l| Line::from(l.as_str()))
        .collect();
    f.render_widget(
        Paragraph::new(input).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Input Summary"),
        ),
        main[0],
    );

    let mid = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(46), Constraint::Min(20)].as_ref())
        .split(main[1]);
    draw_metrics(mid[0], f, snap);

    let trends = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Ratio(1, 3),
                Constraint::Ratio(1, 3),
                Constraint::Ratio(1, 3),
            ]
            .as_ref(),
        )
        .split(mid[1]);
    for (slot, (field, label, color)) in trends.iter().zip(charts::TRENDS) {
        charts::render_trend(f, *slot, snap, *field, label, *color);
    }

    if ui.show_blocks {
        draw_blocks(main[2], f, &rows);
    }
    draw_tail(main[3], f, snap);
}

fn draw_metrics(area: Rect, f: &mut ratatui::Frame, snap: &Snapshot) {
    let mut rows = metric_rows(snap);
    rows.push(table::positions_row(snap));
    let lines: Vec<Line> = rows
        .into_iter()
        .map(|r| {
            Line::from(vec![
                Span::styled(format!("{}: ", r.label), Style::default().fg(Color::Gray)),
                Span::raw(r.value),
            ])
        })
        .collect();
    f.render_widget(
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Run Metrics")),
        area,
    );
}

/// Table height for `n` step rows: borders and header plus at most nine rows.
fn blocks_height(n: usize) -> u16 {
    (n.min(9) as u16 + 3).max(4)
}

fn draw_blocks(area: Rect, f: &mut ratatui::Frame, rows: &[table::BlockRow]) {
    const COL_W: u16 = 13;
    let fit = (area.width.saturating_sub(2 + 8) / (COL_W + 1)) as usize;
    let columns: Vec<Field> = populated_columns(rows).into_iter().take(fit).collect();
    let visible = area.height.saturating_sub(3) as usize;

    let header = Row::new(
        std::iter::once("step".to_string())
            .chain(columns.iter().map(|c| c.key().to_string()))
            .collect::<Vec<_>>(),
    )
    .style(Style::default().fg(Color::Gray));

    let body: Vec<Row> = rows
        .iter()
        .skip(rows.len().saturating_sub(visible))
        .map(|r| {
            let cells = std::iter::once(r.step.to_string()).chain(
                columns
                    .iter()
                    .map(|c| table::format_value(*c, r.cells[*c as usize])),
            );
            Row::new(cells.collect::<Vec<_>>())
        })
        .collect();

    let widths: Vec<Constraint> = std::iter::once(Constraint::Length(8))
        .chain(columns.iter().map(|_| Constraint::Length(COL_W)))
        .collect();
    f.render_widget(
        Table::new(body, widths).header(header).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("MD steps ({})", rows.len())),
        ),
        area,
    );
}

fn draw_tail(area: Rect, f: &mut ratatui::Frame, snap: &Snapshot) {
    let visible = area.height.saturating_sub(2) as usize;
    let lines: Vec<Line> = snap
        .tail
        .iter()
        .skip(snap.tail.len().saturating_sub(visible))
        .map(|l| Line::from(l.as_str()))
        .collect();
    f.render_widget(
        Paragraph::new(lines).block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!("Output Tail (last {} lines)", crate::state::TAIL_CAPACITY)),
        ),
        area,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::Extractor;
    use crate::state::{RunMeta, RunState};
    use ratatui::backend::TestBackend;

    fn buffer_text(terminal: &Terminal<TestBackend>) -> String {
        let buf = terminal.backend().buffer();
        let mut out = String::new();
        for y in 0..buf.area.height {
            for x in 0..buf.area.width {
                out.push_str(buf[(x, y)].symbol());
            }
            out.push('\n');
        }
        out
    }

    #[test]
    fn renders_run_header_metrics_and_tail() {
        let state = RunState::new(RunMeta {
            project: "water".into(),
            logfile: "water.out".into(),
            mode: Some("md".into()),
            ..RunMeta::default()
        });
        let mut ex = Extractor::new();
        let mut sink = &state;
        for line in [
            " MD| Step number 1",
            " MD| Temperature [K] 300.5 300.5",
            " MD| ***",
            "tail marker line",
        ] {
            state.append_output_line(line);
            ex.feed(line, &mut sink);
        }
        let snap = state.snapshot();

        let mut terminal = Terminal::new(TestBackend::new(120, 60)).unwrap();
        let mut ui = UiState::new("cp2k-dash");
        ui.show_blocks = true;
        ui.observe(Some(&snap));
        terminal
            .draw(|f| draw(f.area(), f, &ui, Some(&snap)))
            .unwrap();
        let text = buffer_text(&terminal);
        assert!(text.contains("Project: water"));
        assert!(text.contains("Status: launching"));
        assert!(text.contains("Temperature [K]: 300.50"));
        assert!(text.contains("tail marker line"));
        assert!(text.contains("MD steps (1)"));
    }

    #[test]
    fn block_table_height_is_bounded() {
        assert_eq!(blocks_height(0), 4);
        assert_eq!(blocks_height(5), 8);
        assert_eq!(blocks_height(70_000), 12);
        assert_eq!(blocks_height(usize::MAX), 12);
    }

    #[test]
    fn renders_waiting_message_without_snapshot() {
        let mut terminal = Terminal::new(TestBackend::new(80, 20)).unwrap();
        let ui = UiState::new("cp2k-view");
        terminal.draw(|f| draw(f.area(), f, &ui, None)).unwrap();
        assert!(buffer_text(&terminal).contains("Waiting for CP2K output..."));
    }
}
