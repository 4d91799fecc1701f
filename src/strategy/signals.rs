use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::{Action, Confidence, Signal};

/// Stop distance used by the fallback signal (2% either side)
pub const FALLBACK_BAND_PCT: f64 = 0.02;
pub const FALLBACK_REASON: &str = "Analysis unavailable, holding conservatively";

const REQUIRED_FIELDS: [&str; 5] = ["signal", "reason", "stop_loss", "take_profit", "confidence"];

/// Conservative HOLD used whenever the oracle cannot be trusted
pub fn fallback_signal(price: f64, now: DateTime<Utc>) -> Signal {
    Signal {
        action: Action::Hold,
        reason: FALLBACK_REASON.to_string(),
        stop_loss: price * (1.0 - FALLBACK_BAND_PCT),
        take_profit: price * (1.0 + FALLBACK_BAND_PCT),
        confidence: Confidence::Low,
        is_fallback: true,
        timestamp: now,
    }
}

/// Slice from the first `{` to the last `}`, inclusive
fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

fn as_price(value: &Value) -> Option<f64> {
    let price = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_start_matches('$').replace(',', "").parse().ok()?,
        _ => return None,
    };
    price.is_finite().then_some(price)
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse an oracle reply into a signal
///
/// Commentary around the JSON object is tolerated. Returns `None` when the
/// object is missing, malformed, lacks a required field or carries an
/// unknown action or confidence.
pub fn parse_oracle_response(text: &str, now: DateTime<Utc>) -> Option<Signal> {
    let payload = extract_object(text)?;
    let object = match serde_json::from_str::<Value>(payload) {
        Ok(Value::Object(map)) => map,
        Ok(_) => return None,
        Err(e) => {
            tracing::debug!("Oracle JSON rejected: {}", e);
            return None;
        }
    };

    if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !object.contains_key(**f)) {
        tracing::debug!("Oracle reply missing field '{}'", missing);
        return None;
    }

    let action = object.get("signal").and_then(Value::as_str).and_then(Action::parse)?;
    let confidence = object
        .get("confidence")
        .and_then(Value::as_str)
        .and_then(Confidence::parse)?;
    let stop_loss = object.get("stop_loss").and_then(as_price)?;
    let take_profit = object.get("take_profit").and_then(as_price)?;
    let reason = object.get("reason").map(as_text).unwrap_or_default();

    Some(Signal {
        action,
        reason,
        stop_loss,
        take_profit,
        confidence,
        is_fallback: false,
        timestamp: now,
    })
}
