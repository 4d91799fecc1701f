use super::moving_average::{rolling_mean, Series};

/// RSI for every row, using simple averages of gains and losses over the
/// trailing `period` deltas
///
/// Rows before `period` deltas exist are `None`. A window with no losses
/// reads 100, flat windows included.
pub fn rsi_series(closes: &[Option<f64>], period: usize) -> Series {
    let period = period.max(1);

    let deltas: Series = (0..closes.len())
        .map(|i| {
            if i == 0 {
                return None;
            }
            match (closes[i], closes[i - 1]) {
                (Some(curr), Some(prev)) => Some(curr - prev),
                _ => None,
            }
        })
        .collect();

    let gains: Series = deltas.iter().map(|d| d.map(|d| d.max(0.0))).collect();
    let losses: Series = deltas.iter().map(|d| d.map(|d| (-d).max(0.0))).collect();

    let avg_gain = rolling_mean(&gains, period, period);
    let avg_loss = rolling_mean(&losses, period, period);

    avg_gain
        .iter()
        .zip(&avg_loss)
        .map(|(gain, loss)| match (gain, loss) {
            (Some(_), Some(loss)) if *loss == 0.0 => Some(100.0),
            (Some(gain), Some(loss)) => {
                let rs = gain / loss;
                Some(100.0 - (100.0 / (1.0 + rs)))
            }
            _ => None,
        })
        .collect()
}
