use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::TradeConfig;
use crate::exchange::Exchange;
use crate::execution::{AccountState, ExecutionDecision, ExecutionEngine};
use crate::indicators::{IndicatorEngine, PricePoint};
use crate::models::{PositionState, Signal};
use crate::oracle::DecisionOracle;
use crate::retry::RetryPolicy;
use crate::strategy::SignalGenerator;

/// Summary of one fetch → signal → execute pass
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    /// `None` when the cycle was skipped for lack of market data
    pub price: Option<f64>,
    pub signal: Option<Signal>,
    pub decision: Option<ExecutionDecision>,
    pub orders_submitted: usize,
    pub position_after: Option<PositionState>,
}

impl CycleReport {
    fn skipped(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            price: None,
            signal: None,
            decision: None,
            orders_submitted: 0,
            position_after: None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.price.is_none()
    }
}

/// One instrument, one strategy, one cycle at a time
pub struct TradingBot<E: Exchange> {
    exchange: Arc<E>,
    config: TradeConfig,
    retry: RetryPolicy,
    indicators: IndicatorEngine,
    signals: SignalGenerator,
    engine: ExecutionEngine<E>,
}

impl<E: Exchange> TradingBot<E> {
    pub fn new(config: TradeConfig, exchange: Arc<E>, oracle: Option<Arc<dyn DecisionOracle>>) -> Self {
        let retry = config.retry_policy();
        let account = AccountState::new(exchange.clone(), &config.inst_id, retry, config.default_balance);
        let engine = ExecutionEngine::new(
            exchange.clone(),
            account,
            config.risk_limits(),
            config.execution_settings(),
        );

        Self {
            indicators: IndicatorEngine::new(config.data_points),
            signals: SignalGenerator::new(oracle, &config.symbol, &config.timeframe, config.signal_history),
            exchange,
            retry,
            engine,
            config,
        }
    }

    pub fn config(&self) -> &TradeConfig {
        &self.config
    }

    pub fn exchange(&self) -> &Arc<E> {
        &self.exchange
    }

    pub fn engine(&self) -> &ExecutionEngine<E> {
        &self.engine
    }

    pub fn signal_history(&self) -> Vec<Signal> {
        self.signals.history()
    }

    pub fn price_history(&self) -> Vec<PricePoint> {
        self.indicators.price_history()
    }

    /// Run a single cycle
    ///
    /// Missing market data skips the cycle. Errors returned here are
    /// exchange failures the cycle could not absorb.
    pub async fn run_cycle(&mut self) -> anyhow::Result<CycleReport> {
        let started_at = Utc::now();
        tracing::info!("{}", "=".repeat(60));
        tracing::info!("⏰ Cycle start {}", started_at.format("%Y-%m-%d %H:%M:%S"));

        let exchange = &self.exchange;
        let inst_id = self.config.inst_id.as_str();
        let timeframe = self.config.timeframe.as_str();
        let limit = self.config.data_points;

        let candles = match self
            .retry
            .run("candle fetch", || exchange.fetch_candles(inst_id, timeframe, limit))
            .await
        {
            Ok(candles) if !candles.is_empty() => candles,
            Ok(_) => {
                tracing::warn!("No candles returned for {}, skipping cycle", inst_id);
                return Ok(CycleReport::skipped(started_at));
            }
            Err(e) => {
                tracing::warn!("Market data unavailable ({}), skipping cycle", e);
                return Ok(CycleReport::skipped(started_at));
            }
        };

        let snapshot = match self.indicators.compute(&candles) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!("Indicators unavailable ({}), skipping cycle", e);
                return Ok(CycleReport::skipped(started_at));
            }
        };

        tracing::info!(
            "💰 {} price {:.4} ({:+.2}%), trend {}",
            self.config.symbol,
            snapshot.price,
            snapshot.price_change_pct,
            snapshot.trend.overall
        );

        let signal = self.signals.generate(&snapshot).await;
        let outcome = self.engine.execute(&signal, snapshot.price).await?;

        let report = CycleReport {
            started_at,
            price: Some(snapshot.price),
            signal: Some(signal),
            decision: Some(outcome.decision),
            orders_submitted: outcome.orders_submitted,
            position_after: outcome.position_after,
        };

        tracing::info!(
            "✅ Cycle done: {} orders, position {}",
            report.orders_submitted,
            report
                .position_after
                .as_ref()
                .map(|p| p.to_string())
                .unwrap_or_else(|| "unknown".to_string())
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MemoryExchange;
    use crate::models::{Action, Candle};
    use chrono::Duration;

    fn candles(n: usize) -> Vec<Candle> {
        let start = Utc::now() - Duration::minutes(5 * n as i64);
        (0..n)
            .map(|i| {
                let close = 100.0 + (i as f64 * 0.3).sin();
                Candle {
                    timestamp: start + Duration::minutes(5 * i as i64),
                    open: close,
                    high: close + 0.5,
                    low: close - 0.5,
                    close,
                    volume: 100.0,
                }
            })
            .collect()
    }

    fn config() -> TradeConfig {
        TradeConfig {
            retry_delay_secs: 0,
            close_settle_secs: 0,
            refresh_settle_secs: 0,
            ..TradeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_cycle_without_oracle_holds() {
        let exchange = Arc::new(MemoryExchange::new(candles(96), 100.0));
        let mut bot = TradingBot::new(config(), exchange.clone(), None);

        let report = bot.run_cycle().await.unwrap();

        assert!(!report.is_skipped());
        assert_eq!(report.signal.as_ref().map(|s| s.action), Some(Action::Hold));
        assert_eq!(report.orders_submitted, 0);
        assert!(exchange.submitted_orders().is_empty());
        assert_eq!(bot.price_history().len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_skipped_without_candles() {
        let exchange = Arc::new(MemoryExchange::new(candles(96), 100.0));
        exchange.fail_candles(3);
        let mut bot = TradingBot::new(config(), exchange, None);

        let report = bot.run_cycle().await.unwrap();

        assert!(report.is_skipped());
        assert!(report.signal.is_none());
    }

    #[tokio::test]
    async fn test_candle_fetch_is_retried() {
        let exchange = Arc::new(MemoryExchange::new(candles(96), 100.0));
        exchange.fail_candles(2);
        let mut bot = TradingBot::new(config(), exchange, None);

        let report = bot.run_cycle().await.unwrap();
        assert!(!report.is_skipped());
    }

    #[tokio::test]
    async fn test_position_failure_fails_the_cycle() {
        let exchange = Arc::new(MemoryExchange::new(candles(96), 100.0));
        exchange.fail_positions(3);
        let mut bot = TradingBot::new(config(), exchange, None);

        assert!(bot.run_cycle().await.is_err());
    }
}
