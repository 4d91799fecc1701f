// Technical indicators module
// Implements MA, EMA/MACD, RSI and Bollinger bands over candle windows

pub mod bollinger;
pub mod features;
pub mod moving_average;
pub mod rsi;

pub use bollinger::{band_position, bollinger_series, BollingerSeries};
pub use features::{
    snapshot_from_candles, FeatureSnapshot, IndicatorEngine, IndicatorError, IndicatorFrame,
    MacdBias, OverallTrend, PricePoint, TrendAnalysis, TrendDirection,
};
pub use moving_average::{ewm_mean, fill_gaps, rolling_mean, rolling_std, Series};
pub use rsi::rsi_series;
