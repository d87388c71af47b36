use crate::metrics;
use crate::model::{Field, Snapshot};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph, Sparkline},
    Frame,
};

/// Observables drawn as trends, with their colors.
pub const TRENDS: &[(Field, &str, Color)] = &[
    (Field::PotentialInst, "Potential energy", Color::Green),
    (Field::TotalEnergy, "Total energy", Color::Cyan),
    (Field::TemperatureInst, "Temperature", Color::Yellow),
];

/// `(step, value)` pairs for every step where the field is present.
pub fn trend_points(steps: &[Option<f64>], values: &[Option<f64>]) -> Vec<(f64, f64)> {
    steps
        .iter()
        .zip(values)
        .filter_map(|(s, v)| Some(((*s)?, (*v)?)))
        .filter(|(_, v)| v.is_finite())
        .collect()
}

fn bounds(values: impl Iterator<Item = f64>) -> [f64; 2] {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        return [0.0, 1.0];
    }
    let pad = ((hi - lo) * 0.05).max(hi.abs() * 1e-9).max(1e-12);
    [lo - pad, hi + pad]
}

fn metrics_line<'a>(metrics: (f64, f64, f64, f64), precision: usize, color: Color) -> Line<'a> {
    let (mean, median, p25, p75) = metrics;
    let mut spans = Vec::new();
    for (label, value) in [("avg", mean), ("med", median), ("p25", p25), ("p75", p75)] {
        if !spans.is_empty() {
            spans.push(Span::raw(" "));
        }
        spans.push(Span::styled(label, Style::default().fg(Color::Gray)));
        spans.push(Span::styled(
            format!(" {value:.precision$}"),
            Style::default().fg(color),
        ));
    }
    Line::from(spans)
}

fn trend_title<'a>(label: &'a str, latest: Option<f64>, precision: usize, color: Color) -> Line<'a> {
    let latest = latest
        .map(|v| format!("{v:.precision$}"))
        .unwrap_or_else(|| "-".to_string());
    Line::from(vec![
        Span::raw(format!("{label} (last ")),
        Span::styled(latest, Style::default().fg(color)),
        Span::raw(")"),
    ])
}

/// One trend panel: a line chart with stats when there is room, a sparkline otherwise.
pub fn render_trend(f: &mut Frame, area: Rect, snap: &Snapshot, field: Field, label: &str, color: Color) {
    let series = snap.field_series(field);
    let precision = crate::dashboard::table::precision(field);
    let title = trend_title(label, metrics::latest(series), precision, color);
    let block = Block::default().borders(Borders::ALL).title(title);
    let inner = block.inner(area);

    if inner.height < 6 {
        let data = metrics::scale_levels(
            &metrics::downsample(&metrics::present(series), inner.width as usize),
            100,
        );
        f.render_widget(
            Sparkline::default()
                .block(block)
                .data(&data)
                .max(100)
                .style(Style::default().fg(color)),
            area,
        );
        return;
    }

    let points = trend_points(snap.series("step"), series);
    if points.is_empty() {
        f.render_widget(Paragraph::new("Waiting for MD steps...").block(block), area);
        return;
    }

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(4), Constraint::Length(1)].as_ref())
        .split(inner);

    let x = bounds(points.iter().map(|(x, _)| *x));
    let y = bounds(points.iter().map(|(_, y)| *y));
    let dataset = Dataset::default()
        .graph_type(GraphType::Line)
        .marker(symbols::Marker::Braille)
        .style(Style::default().fg(color))
        .data(&points);
    let chart = Chart::new(vec![dataset])
        .x_axis(Axis::default().bounds(x))
        .y_axis(
            Axis::default()
                .bounds(y)
                .labels(vec![
                    Span::raw(format!("{:.*}", precision.min(3), y[0])),
                    Span::raw(format!("{:.*}", precision.min(3), y[1])),
                ]),
        );
    f.render_widget(chart, rows[0]);

    let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();
    if let Some(m) = metrics::compute_metrics(&values) {
        f.render_widget(
            Paragraph::new(metrics_line(m, precision, color)).alignment(Alignment::Center),
            rows[1],
        );
    }
    f.render_widget(block, area);
}
