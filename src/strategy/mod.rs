// Signal generation: oracle-backed with a deterministic fallback
pub mod prompt;
pub mod signals;

pub use prompt::build_prompt;
pub use signals::{fallback_signal, parse_oracle_response, FALLBACK_BAND_PCT};

use chrono::Utc;
use std::sync::Arc;

use crate::history::BoundedHistory;
use crate::indicators::FeatureSnapshot;
use crate::models::Signal;
use crate::oracle::DecisionOracle;

pub const DEFAULT_SIGNAL_HISTORY: usize = 30;

/// Turns a feature snapshot into a trading signal
///
/// Never fails: a missing oracle, a failed call or an unusable reply all
/// produce the fallback signal.
pub struct SignalGenerator {
    oracle: Option<Arc<dyn DecisionOracle>>,
    symbol: String,
    timeframe: String,
    history: BoundedHistory<Signal>,
}

impl SignalGenerator {
    pub fn new(
        oracle: Option<Arc<dyn DecisionOracle>>,
        symbol: &str,
        timeframe: &str,
        history_capacity: usize,
    ) -> Self {
        Self {
            oracle,
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
            history: BoundedHistory::new(history_capacity),
        }
    }

    pub async fn generate(&mut self, snapshot: &FeatureSnapshot) -> Signal {
        let now = Utc::now();

        let oracle = match &self.oracle {
            Some(oracle) => oracle,
            None => {
                tracing::warn!("No decision oracle configured, using fallback signal");
                return fallback_signal(snapshot.price, now);
            }
        };

        let prompt = build_prompt(&self.symbol, &self.timeframe, snapshot, &self.history.snapshot());

        let reply = match oracle.complete(&prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!("Decision oracle failed: {}, using fallback signal", e);
                return fallback_signal(snapshot.price, now);
            }
        };

        match parse_oracle_response(&reply, now) {
            Some(signal) => {
                tracing::info!(
                    "🧠 Signal {} ({}): {}",
                    signal.action,
                    signal.confidence,
                    signal.reason
                );
                self.history.push(signal.clone());
                signal
            }
            None => {
                tracing::warn!("Unusable oracle reply, using fallback signal");
                fallback_signal(snapshot.price, now)
            }
        }
    }

    /// Accepted oracle signals, oldest first
    pub fn history(&self) -> Vec<Signal> {
        self.history.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::snapshot_from_candles;
    use crate::models::{Action, Candle, Confidence};
    use crate::oracle::OracleError;
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use std::sync::Mutex;

    struct ScriptedOracle {
        replies: Mutex<Vec<Result<String, OracleError>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedOracle {
        fn new(replies: Vec<Result<String, OracleError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                prompts: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl DecisionOracle for ScriptedOracle {
        async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(OracleError::Unavailable("script exhausted".to_string()));
            }
            replies.remove(0)
        }
    }

    fn snapshot(price: f64) -> FeatureSnapshot {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let candles = vec![Candle {
            timestamp: start + Duration::minutes(5),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1.0,
        }];
        snapshot_from_candles(&candles).unwrap()
    }

    fn valid_reply(action: &str) -> String {
        format!(
            r#"{{"signal":"{}","reason":"test","stop_loss":95,"take_profit":105,"confidence":"HIGH"}}"#,
            action
        )
    }

    #[tokio::test]
    async fn test_without_oracle_uses_fallback() {
        let mut generator = SignalGenerator::new(None, "X", "5m", 30);
        let signal = generator.generate(&snapshot(50.0)).await;

        assert!(signal.is_fallback);
        assert_eq!(signal.action, Action::Hold);
        assert_eq!(signal.confidence, Confidence::Low);
        assert!((signal.stop_loss - 49.0).abs() < 1e-9);
        assert!(generator.history().is_empty());
    }

    #[tokio::test]
    async fn test_bad_replies_fall_back() {
        let oracle = ScriptedOracle::new(vec![
            Ok(String::new()),
            Ok("no json here".to_string()),
            Ok(r#"{"signal":"BUY"}"#.to_string()),
            Err(OracleError::EmptyResponse),
        ]);
        let mut generator = SignalGenerator::new(Some(oracle), "X", "5m", 30);

        for _ in 0..4 {
            let signal = generator.generate(&snapshot(100.0)).await;
            assert!(signal.is_fallback);
            assert_eq!(signal.action, Action::Hold);
        }
        assert!(generator.history().is_empty());
    }

    #[tokio::test]
    async fn test_accepted_signals_are_recorded() {
        let oracle = ScriptedOracle::new(vec![Ok(valid_reply("SELL")), Ok(valid_reply("BUY"))]);
        let mut generator = SignalGenerator::new(Some(oracle.clone()), "X", "5m", 30);

        let first = generator.generate(&snapshot(100.0)).await;
        let second = generator.generate(&snapshot(100.0)).await;

        assert_eq!(first.action, Action::Sell);
        assert_eq!(second.action, Action::Buy);
        assert_eq!(generator.history().len(), 2);

        // Second prompt carries the first signal as context
        let prompts = oracle.prompts.lock().unwrap();
        assert!(prompts[1].contains("SELL (HIGH)"));
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let replies = (0..5).map(|_| Ok(valid_reply("HOLD"))).collect();
        let oracle = ScriptedOracle::new(replies);
        let mut generator = SignalGenerator::new(Some(oracle), "X", "5m", 3);

        for _ in 0..5 {
            generator.generate(&snapshot(100.0)).await;
        }

        assert_eq!(generator.history().len(), 3);
    }
}
