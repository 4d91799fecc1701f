use crate::indicators::FeatureSnapshot;
use crate::models::Signal;

/// How many past signals are echoed back to the oracle
const RECENT_SIGNALS: usize = 3;

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "n/a".to_string(),
    }
}

/// Compact feature summary asking for a single JSON decision object
pub fn build_prompt(
    symbol: &str,
    timeframe: &str,
    snapshot: &FeatureSnapshot,
    recent: &[Signal],
) -> String {
    let trend = &snapshot.trend;
    let mut prompt = format!(
        "Analyze {symbol} on the {timeframe} timeframe.\n\
         Current price: ${price:.4}\n\
         Change since previous candle: {change:+.2}%\n\
         Trend: {overall} (short-term {short:?}, medium-term {medium:?}, MACD {bias:?})\n\
         SMA5/20/50: {sma5:.4} / {sma20:.4} / {sma50:.4}\n\
         MACD: {macd:.6} signal {macd_signal:.6} histogram {hist:.6}\n\
         RSI(14): {rsi}\n\
         Bollinger position: {bb}\n",
        symbol = symbol,
        timeframe = timeframe,
        price = snapshot.price,
        change = snapshot.price_change_pct,
        overall = trend.overall,
        short = trend.short_term,
        medium = trend.medium_term,
        bias = trend.macd_bias,
        sma5 = snapshot.sma_5,
        sma20 = snapshot.sma_20,
        sma50 = snapshot.sma_50,
        macd = snapshot.macd,
        macd_signal = snapshot.macd_signal,
        hist = snapshot.macd_histogram,
        rsi = fmt_opt(snapshot.rsi, 1),
        bb = fmt_opt(snapshot.bb_position, 2),
    );

    if !recent.is_empty() {
        prompt.push_str("Recent signals:\n");
        let start = recent.len().saturating_sub(RECENT_SIGNALS);
        for signal in &recent[start..] {
            prompt.push_str(&format!(
                "- {} {} ({})\n",
                signal.timestamp.format("%H:%M"),
                signal.action,
                signal.confidence
            ));
        }
    }

    prompt.push_str(
        "\nReply with one JSON object:\n\
         {\"signal\": \"BUY|SELL|HOLD\", \"reason\": \"short rationale\", \
         \"stop_loss\": <price>, \"take_profit\": <price>, \
         \"confidence\": \"HIGH|MEDIUM|LOW\"}\n",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::snapshot_from_candles;
    use crate::models::{Action, Candle, Confidence};
    use chrono::{Duration, TimeZone, Utc};

    fn snapshot() -> FeatureSnapshot {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let candles: Vec<Candle> = (0..30)
            .map(|i| {
                let close = 100.0 + i as f64;
                Candle {
                    timestamp: start + Duration::minutes(5 * i),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 10.0,
                }
            })
            .collect();
        snapshot_from_candles(&candles).unwrap()
    }

    fn signal(action: Action) -> Signal {
        Signal {
            action,
            reason: "r".to_string(),
            stop_loss: 1.0,
            take_profit: 2.0,
            confidence: Confidence::Medium,
            is_fallback: false,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_prompt_mentions_market_and_format() {
        let prompt = build_prompt("OKB/USDT:USDT", "5m", &snapshot(), &[]);

        assert!(prompt.contains("OKB/USDT:USDT"));
        assert!(prompt.contains("5m"));
        assert!(prompt.contains("$129.0000"));
        assert!(prompt.contains("strong up"));
        assert!(prompt.contains("\"confidence\""));
        assert!(!prompt.contains("Recent signals"));
    }

    #[test]
    fn test_prompt_echoes_only_latest_signals() {
        let recent = vec![
            signal(Action::Sell),
            signal(Action::Buy),
            signal(Action::Buy),
            signal(Action::Hold),
        ];
        let prompt = build_prompt("X", "5m", &snapshot(), &recent);

        assert_eq!(prompt.matches("\n- ").count(), 3);
        assert!(!prompt.contains("SELL (MEDIUM)"));
    }
}
