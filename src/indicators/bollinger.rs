use super::moving_average::{rolling_mean, rolling_std, Series};

/// Band width floor so a flat window never divides by zero
const BAND_EPSILON: f64 = 1e-12;

/// Bollinger band columns
#[derive(Debug, Clone, PartialEq)]
pub struct BollingerSeries {
    pub upper: Series,
    pub middle: Series,
    pub lower: Series,
    /// Where the close sits inside the band, 0 = lower, 1 = upper
    pub position: Series,
}

/// Bands at `num_std` sample deviations around a `period` mean
///
/// Rows need a full window before any band is defined.
pub fn bollinger_series(closes: &[Option<f64>], period: usize, num_std: f64) -> BollingerSeries {
    let middle = rolling_mean(closes, period, period);
    let std = rolling_std(closes, period, period);

    let mut upper = Vec::with_capacity(closes.len());
    let mut lower = Vec::with_capacity(closes.len());
    let mut position = Vec::with_capacity(closes.len());

    for i in 0..closes.len() {
        match (middle[i], std[i]) {
            (Some(mid), Some(sd)) => {
                let up = mid + sd * num_std;
                let low = mid - sd * num_std;
                upper.push(Some(up));
                lower.push(Some(low));
                position.push(closes[i].map(|close| band_position(close, up, low)));
            }
            _ => {
                upper.push(None);
                lower.push(None);
                position.push(None);
            }
        }
    }

    BollingerSeries {
        upper,
        middle,
        lower,
        position,
    }
}

/// `(close - lower) / (upper - lower)` clamped to [0, 1]
pub fn band_position(close: f64, upper: f64, lower: f64) -> f64 {
    let width = (upper - lower).max(BAND_EPSILON);
    ((close - lower) / width).clamp(0.0, 1.0)
}
