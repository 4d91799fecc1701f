/// Indicator column: one value per candle, `None` where not yet defined
pub type Series = Vec<Option<f64>>;

/// Trailing-window mean over a series
///
/// A row gets a value once at least `min_periods` defined inputs fall inside
/// its window; missing inputs are skipped, not counted as zero.
pub fn rolling_mean(values: &[Option<f64>], window: usize, min_periods: usize) -> Series {
    let window = window.max(1);
    let min_periods = min_periods.max(1);

    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let defined: Vec<f64> = values[start..=i].iter().flatten().copied().collect();
            if defined.len() < min_periods {
                return None;
            }
            Some(defined.iter().sum::<f64>() / defined.len() as f64)
        })
        .collect()
}

/// Trailing-window sample standard deviation (n - 1 denominator)
pub fn rolling_std(values: &[Option<f64>], window: usize, min_periods: usize) -> Series {
    let window = window.max(1);
    let min_periods = min_periods.max(2);

    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            let defined: Vec<f64> = values[start..=i].iter().flatten().copied().collect();
            if defined.len() < min_periods {
                return None;
            }
            let n = defined.len() as f64;
            let mean = defined.iter().sum::<f64>() / n;
            let var = defined.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            Some(var.sqrt())
        })
        .collect()
}

/// Exponentially weighted mean with `alpha = 2 / (span + 1)`
///
/// Uses adjusted weighting: row t is `sum((1-a)^i * x[t-i]) / sum((1-a)^i)`,
/// so the first output equals the first observation. Gaps keep decaying the
/// older weights and repeat the previous value.
pub fn ewm_mean(values: &[Option<f64>], span: usize) -> Series {
    let alpha = 2.0 / (span.max(1) as f64 + 1.0);
    let decay = 1.0 - alpha;

    let mut numerator = 0.0;
    let mut denominator = 0.0;

    values
        .iter()
        .map(|value| {
            match value {
                Some(x) => {
                    numerator = x + decay * numerator;
                    denominator = 1.0 + decay * denominator;
                }
                None => {
                    numerator *= decay;
                    denominator *= decay;
                }
            }
            (denominator > 0.0).then(|| numerator / denominator)
        })
        .collect()
}

/// Back-fill leading gaps, then forward-fill the rest
///
/// A column with no defined value at all stays empty.
pub fn fill_gaps(series: &[Option<f64>]) -> Series {
    let first = match series.iter().flatten().next() {
        Some(v) => *v,
        None => return series.to_vec(),
    };

    let mut last = first;
    series
        .iter()
        .map(|value| {
            if let Some(v) = value {
                last = *v;
            }
            Some(last)
        })
        .collect()
}

/// Element-wise `a - b`, defined where both are
pub fn subtract(a: &[Option<f64>], b: &[Option<f64>]) -> Series {
    a.iter()
        .zip(b)
        .map(|(x, y)| match (x, y) {
            (Some(x), Some(y)) => Some(x - y),
            _ => None,
        })
        .collect()
}
