/// Compute summary statistics (mean, median, 25th percentile, 75th percentile) from samples
pub fn compute_metrics(samples: &[f64]) -> Option<(f64, f64, f64, f64)> {
    if samples.len() < 2 {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    let mean = samples.iter().sum::<f64>() / n as f64;
    let median = sorted[n / 2];
    let p25 = sorted[n / 4];
    let p75 = sorted[3 * n / 4];
    Some((mean, median, p25, p75))
}

/// Present values of a sparse series, in order.
pub fn present(series: &[Option<f64>]) -> Vec<f64> {
    series.iter().flatten().copied().filter(|v| v.is_finite()).collect()
}

/// Last non-null value of a series.
pub fn latest(series: &[Option<f64>]) -> Option<f64> {
    series.iter().rev().flatten().copied().next()
}

/// Evenly pick at most `width` points, always keeping the newest one.
pub fn downsample(values: &[f64], width: usize) -> Vec<f64> {
    if width == 0 || values.is_empty() {
        return Vec::new();
    }
    if values.len() <= width {
        return values.to_vec();
    }
    let step = values.len() as f64 / width as f64;
    let mut out: Vec<f64> = (0..width)
        .map(|i| values[((i as f64 * step) as usize).min(values.len() - 1)])
        .collect();
    if let (Some(last), Some(newest)) = (out.last_mut(), values.last()) {
        *last = *newest;
    }
    out
}

/// Map values onto `1..=levels` relative to their own min/max. A flat series maps to the
/// top level.
pub fn scale_levels(values: &[f64], levels: u64) -> Vec<u64> {
    let (min, max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    let span = max - min;
    values
        .iter()
        .map(|v| {
            if span <= 0.0 || !span.is_finite() {
                levels
            } else {
                1 + (((v - min) / span) * (levels - 1) as f64).round() as u64
            }
        })
        .collect()
}

const ASCII_LEVELS: &[u8] = b" .:-=+*#%@";

/// One-line text rendering of a series, for plain-text output.
pub fn ascii_sparkline(series: &[Option<f64>], width: usize) -> String {
    let values = downsample(&present(series), width);
    scale_levels(&values, ASCII_LEVELS.len() as u64 - 1)
        .into_iter()
        .map(|l| ASCII_LEVELS[l as usize] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_need_two_samples() {
        assert!(compute_metrics(&[1.0]).is_none());
        let (mean, median, p25, p75) = compute_metrics(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_eq!(mean, 2.5);
        assert_eq!(median, 3.0);
        assert_eq!(p25, 2.0);
        assert_eq!(p75, 4.0);
    }

    #[test]
    fn latest_skips_nulls() {
        assert_eq!(latest(&[Some(1.0), Some(2.0), None]), Some(2.0));
        assert_eq!(latest(&[None, None]), None);
    }

    #[test]
    fn downsample_keeps_newest() {
        let values: Vec<f64> = (0..100).map(f64::from).collect();
        let out = downsample(&values, 10);
        assert_eq!(out.len(), 10);
        assert_eq!(out[0], 0.0);
        assert_eq!(out[9], 99.0);
    }

    #[test]
    fn ascii_sparkline_spans_full_range() {
        let line = ascii_sparkline(&[Some(0.0), None, Some(5.0), Some(10.0)], 40);
        assert_eq!(line, ".+@");
        assert_eq!(ascii_sparkline(&[Some(3.0), Some(3.0)], 40), "@@");
        assert_eq!(ascii_sparkline(&[], 40), "");
    }
}
