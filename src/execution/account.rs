use std::sync::Arc;

use crate::exchange::{Exchange, ExchangeError, ExchangePosition};
use crate::models::{ContractSpec, PositionRecord, PositionSide, PositionState};
use crate::retry::RetryPolicy;

/// Position states the exchange reports for a tradable position
const LIVE_STATES: [&str; 2] = ["live", "normal"];

/// Live balance and position view, re-read from the exchange on every call
pub struct AccountState<E: Exchange> {
    exchange: Arc<E>,
    inst_id: String,
    retry: RetryPolicy,
    default_balance: f64,
}

impl<E: Exchange> AccountState<E> {
    pub fn new(exchange: Arc<E>, inst_id: &str, retry: RetryPolicy, default_balance: f64) -> Self {
        Self {
            exchange,
            inst_id: inst_id.to_string(),
            retry,
            default_balance,
        }
    }

    pub fn inst_id(&self) -> &str {
        &self.inst_id
    }

    /// Available USDT, or the configured default once retries run out
    ///
    /// The default lets trading continue through a flaky balance endpoint,
    /// so a wrong default directly loosens the margin gate.
    pub async fn usdt_balance(&self) -> f64 {
        let exchange = &self.exchange;
        match self
            .retry
            .run("balance query", || exchange.fetch_usdt_balance())
            .await
        {
            Ok(balance) => balance,
            Err(e) => {
                tracing::warn!(
                    "⚠️  Balance unavailable ({}), assuming default {:.2} USDT",
                    e,
                    self.default_balance
                );
                self.default_balance
            }
        }
    }

    /// Lot-size rules, falling back to the defaults on failure
    pub async fn contract_spec(&self) -> ContractSpec {
        let exchange = &self.exchange;
        let inst_id = self.inst_id.as_str();
        match self
            .retry
            .run("instrument query", || exchange.fetch_contract_spec(inst_id))
            .await
        {
            Ok(spec) => spec,
            Err(e) => {
                let spec = ContractSpec::default();
                tracing::warn!("Contract spec unavailable ({}), using defaults {:?}", e, spec);
                spec
            }
        }
    }

    /// The single open position on the instrument, if any
    pub async fn current_position(&self) -> Result<Option<PositionRecord>, ExchangeError> {
        let spec = self.contract_spec().await;
        let exchange = &self.exchange;
        let inst_id = self.inst_id.as_str();
        let rows = self
            .retry
            .run("position query", || exchange.fetch_positions(inst_id))
            .await?;

        Ok(select_position(&rows, &self.inst_id, spec.min_size_f64()))
    }

    pub async fn position_state(&self) -> Result<PositionState, ExchangeError> {
        Ok(PositionState::from_record(self.current_position().await?))
    }
}

/// Normalize one raw exchange row
///
/// Hedge-mode rows name their side; net-mode rows carry it in the sign.
/// Dust at or below `min_size` and non-live rows count as no position.
pub fn normalize_position(raw: &ExchangePosition, min_size: f64) -> Option<PositionRecord> {
    let state = raw.state.clone().unwrap_or_else(|| "live".to_string());
    if !LIVE_STATES.contains(&state.to_ascii_lowercase().as_str()) {
        return None;
    }

    let side = match raw.pos_side.to_ascii_lowercase().as_str() {
        "long" => PositionSide::Long,
        "short" => PositionSide::Short,
        "net" if raw.pos > 0.0 => PositionSide::Long,
        "net" if raw.pos < 0.0 => PositionSide::Short,
        _ => return None,
    };

    let size = raw.pos.abs();
    if !size.is_finite() || size <= min_size {
        return None;
    }

    Some(PositionRecord {
        side,
        size,
        entry_price: raw.avg_px,
        unrealized_pnl: raw.upl,
        leverage: raw.lever.unwrap_or(0.0),
        state,
    })
}

/// Pick the instrument's position out of the exchange rows
///
/// With several live legs (a half-finished flip), the largest one wins
/// and the rest are logged.
pub fn select_position(
    rows: &[ExchangePosition],
    inst_id: &str,
    min_size: f64,
) -> Option<PositionRecord> {
    let mut live: Vec<PositionRecord> = rows
        .iter()
        .filter(|row| row.inst_id == inst_id)
        .filter_map(|row| normalize_position(row, min_size))
        .collect();

    if live.len() > 1 {
        tracing::warn!(
            "{} live position legs on {}, using the largest",
            live.len(),
            inst_id
        );
    }

    live.sort_by(|a, b| b.size.total_cmp(&a.size));
    live.into_iter().next()
}
