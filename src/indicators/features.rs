use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use super::bollinger::bollinger_series;
use super::moving_average::{ewm_mean, fill_gaps, rolling_mean, subtract, Series};
use super::rsi::rsi_series;
use crate::history::BoundedHistory;
use crate::models::Candle;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum IndicatorError {
    #[error("no candles to compute indicators from")]
    EmptyWindow,
    #[error("no finite close price in {0} candles")]
    NoPrice(usize),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum TrendDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum OverallTrend {
    StrongUp,
    StrongDown,
    Ranging,
}

impl fmt::Display for OverallTrend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallTrend::StrongUp => write!(f, "strong up"),
            OverallTrend::StrongDown => write!(f, "strong down"),
            OverallTrend::Ranging => write!(f, "ranging"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum MacdBias {
    Bullish,
    Bearish,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrendAnalysis {
    pub short_term: TrendDirection,
    pub medium_term: TrendDirection,
    pub macd_bias: MacdBias,
    pub overall: OverallTrend,
    pub rsi_level: Option<f64>,
}

impl TrendAnalysis {
    pub fn classify(
        price: f64,
        sma_20: f64,
        sma_50: f64,
        macd: f64,
        macd_signal: f64,
        rsi: Option<f64>,
    ) -> Self {
        let direction = |reference: f64| {
            if price > reference {
                TrendDirection::Up
            } else {
                TrendDirection::Down
            }
        };

        let short_term = direction(sma_20);
        let medium_term = direction(sma_50);

        let overall = match (short_term, medium_term) {
            (TrendDirection::Up, TrendDirection::Up) => OverallTrend::StrongUp,
            (TrendDirection::Down, TrendDirection::Down) => OverallTrend::StrongDown,
            _ => OverallTrend::Ranging,
        };

        let macd_bias = if macd > macd_signal {
            MacdBias::Bullish
        } else {
            MacdBias::Bearish
        };

        Self {
            short_term,
            medium_term,
            macd_bias,
            overall,
            rsi_level: rsi,
        }
    }
}

/// Indicator values at the latest closed candle
///
/// RSI and Bollinger fields stay `None` when the window is too short to
/// define them even once.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FeatureSnapshot {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub price_change_pct: f64,
    pub sma_5: f64,
    pub sma_20: f64,
    pub sma_50: f64,
    pub ema_12: f64,
    pub ema_26: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub rsi: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub bb_position: Option<f64>,
    pub trend: TrendAnalysis,
}

/// Full indicator columns for a candle window, gaps already filled
#[derive(Debug, Clone)]
pub struct IndicatorFrame {
    pub close: Series,
    pub sma_5: Series,
    pub sma_20: Series,
    pub sma_50: Series,
    pub ema_12: Series,
    pub ema_26: Series,
    pub macd: Series,
    pub macd_signal: Series,
    pub macd_histogram: Series,
    pub rsi: Series,
    pub bb_upper: Series,
    pub bb_middle: Series,
    pub bb_lower: Series,
    pub bb_position: Series,
}

impl IndicatorFrame {
    /// Compute every column over `candles` (oldest first)
    ///
    /// Non-finite closes count as missing rows rather than failing the frame.
    pub fn compute(candles: &[Candle]) -> Self {
        let close: Series = candles
            .iter()
            .map(|c| c.close.is_finite().then_some(c.close))
            .collect();

        let sma_5 = rolling_mean(&close, 5, 1);
        let sma_20 = rolling_mean(&close, 20, 1);
        let sma_50 = rolling_mean(&close, 50, 1);

        let ema_12 = ewm_mean(&close, 12);
        let ema_26 = ewm_mean(&close, 26);
        let macd = subtract(&ema_12, &ema_26);
        let macd_signal = ewm_mean(&macd, 9);
        let macd_histogram = subtract(&macd, &macd_signal);

        let rsi = rsi_series(&close, 14);
        let bands = bollinger_series(&close, 20, 2.0);

        Self {
            close: fill_gaps(&close),
            sma_5: fill_gaps(&sma_5),
            sma_20: fill_gaps(&sma_20),
            sma_50: fill_gaps(&sma_50),
            ema_12: fill_gaps(&ema_12),
            ema_26: fill_gaps(&ema_26),
            macd: fill_gaps(&macd),
            macd_signal: fill_gaps(&macd_signal),
            macd_histogram: fill_gaps(&macd_histogram),
            rsi: fill_gaps(&rsi),
            bb_upper: fill_gaps(&bands.upper),
            bb_middle: fill_gaps(&bands.middle),
            bb_lower: fill_gaps(&bands.lower),
            bb_position: fill_gaps(&bands.position),
        }
    }

    pub fn len(&self) -> usize {
        self.close.len()
    }

    pub fn is_empty(&self) -> bool {
        self.close.is_empty()
    }
}

fn last(series: &Series) -> Option<f64> {
    series.last().copied().flatten()
}

/// Turns candle windows into feature snapshots and keeps a rolling price log
pub struct IndicatorEngine {
    price_history: BoundedHistory<PricePoint>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub price_change_pct: f64,
}

impl IndicatorEngine {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            price_history: BoundedHistory::new(history_capacity),
        }
    }

    /// Build a fresh snapshot from the latest candle window
    pub fn compute(&mut self, candles: &[Candle]) -> Result<FeatureSnapshot, IndicatorError> {
        let snapshot = snapshot_from_candles(candles)?;

        self.price_history.push(PricePoint {
            timestamp: snapshot.timestamp,
            price: snapshot.price,
            price_change_pct: snapshot.price_change_pct,
        });

        Ok(snapshot)
    }

    pub fn price_history(&self) -> Vec<PricePoint> {
        self.price_history.snapshot()
    }
}

/// Snapshot of the last row of the frame computed over `candles`
pub fn snapshot_from_candles(candles: &[Candle]) -> Result<FeatureSnapshot, IndicatorError> {
    if candles.is_empty() {
        return Err(IndicatorError::EmptyWindow);
    }
    let frame = IndicatorFrame::compute(candles);

    // Price, time and range all come from the newest candle with a usable close
    let row = candles
        .iter()
        .rposition(|c| c.close.is_finite())
        .ok_or(IndicatorError::NoPrice(candles.len()))?;
    let latest = &candles[row];
    let price = latest.close;

    let price_change_pct = match row.checked_sub(1).and_then(|prev| frame.close[prev]) {
        Some(previous) => (price - previous) / previous.max(0.0001) * 100.0,
        None => 0.0,
    };

    // Every moving-average column is defined wherever a close is
    let sma_5 = last(&frame.sma_5).unwrap_or(price);
    let sma_20 = last(&frame.sma_20).unwrap_or(price);
    let sma_50 = last(&frame.sma_50).unwrap_or(price);
    let ema_12 = last(&frame.ema_12).unwrap_or(price);
    let ema_26 = last(&frame.ema_26).unwrap_or(price);
    let macd = last(&frame.macd).unwrap_or(0.0);
    let macd_signal = last(&frame.macd_signal).unwrap_or(0.0);
    let macd_histogram = last(&frame.macd_histogram).unwrap_or(0.0);
    let rsi = last(&frame.rsi);

    let trend = TrendAnalysis::classify(price, sma_20, sma_50, macd, macd_signal, rsi);

    Ok(FeatureSnapshot {
        timestamp: latest.timestamp,
        price,
        high: latest.high,
        low: latest.low,
        volume: latest.volume,
        price_change_pct,
        sma_5,
        sma_20,
        sma_50,
        ema_12,
        ema_26,
        macd,
        macd_signal,
        macd_histogram,
        rsi,
        bb_upper: last(&frame.bb_upper),
        bb_middle: last(&frame.bb_middle),
        bb_lower: last(&frame.bb_lower),
        bb_position: last(&frame.bb_position),
        trend,
    })
}
