use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// OHLCV candlestick data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Trading action requested by a signal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "BUY" => Some(Action::Buy),
            "SELL" => Some(Action::Sell),
            "HOLD" => Some(Action::Hold),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Buy => write!(f, "BUY"),
            Action::Sell => write!(f, "SELL"),
            Action::Hold => write!(f, "HOLD"),
        }
    }
}

/// Coarse trust level attached to a signal, used as a risk gate
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Some(Confidence::High),
            "MEDIUM" => Some(Confidence::Medium),
            "LOW" => Some(Confidence::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confidence::High => write!(f, "HIGH"),
            Confidence::Medium => write!(f, "MEDIUM"),
            Confidence::Low => write!(f, "LOW"),
        }
    }
}

/// Trading signal, immutable once created
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub action: Action,
    pub reason: String,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub confidence: Confidence,
    pub is_fallback: bool,
    pub timestamp: DateTime<Utc>,
}

/// Lot-size rules for the traded instrument
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ContractSpec {
    pub min_size: Decimal,
    pub size_increment: Decimal,
    pub contract_value: Decimal,
}

impl Default for ContractSpec {
    fn default() -> Self {
        Self {
            min_size: Decimal::new(1, 2),       // 0.01
            size_increment: Decimal::new(1, 4), // 0.0001
            contract_value: Decimal::new(1, 1), // 0.1
        }
    }
}

impl ContractSpec {
    pub fn contract_value_f64(&self) -> f64 {
        self.contract_value.to_f64().unwrap_or(0.0)
    }

    pub fn min_size_f64(&self) -> f64 {
        self.min_size.to_f64().unwrap_or(0.0)
    }

    /// Notional of `contracts` at `price`
    pub fn notional(&self, contracts: f64, price: f64) -> f64 {
        contracts * self.contract_value_f64() * price
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn opposite(self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    /// Side an order must take to open (or add to) this position
    pub fn opening_order_side(self) -> OrderSide {
        match self {
            PositionSide::Long => OrderSide::Buy,
            PositionSide::Short => OrderSide::Sell,
        }
    }

    /// Side an order must take to reduce this position
    pub fn closing_order_side(self) -> OrderSide {
        self.opposite().opening_order_side()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }
}

impl fmt::Display for PositionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

/// Live open position on the instrument
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionRecord {
    pub side: PositionSide,
    pub size: f64, // contracts, always > 0
    pub entry_price: f64,
    pub unrealized_pnl: f64,
    pub leverage: f64,
    pub state: String,
}

/// Position state derived once per cycle from the exchange
#[derive(Debug, Clone, PartialEq)]
pub enum PositionState {
    NoPosition,
    Long(PositionRecord),
    Short(PositionRecord),
}

impl PositionState {
    pub fn from_record(record: Option<PositionRecord>) -> Self {
        match record {
            None => PositionState::NoPosition,
            Some(r) if r.side == PositionSide::Long => PositionState::Long(r),
            Some(r) => PositionState::Short(r),
        }
    }

    pub fn record(&self) -> Option<&PositionRecord> {
        match self {
            PositionState::NoPosition => None,
            PositionState::Long(r) | PositionState::Short(r) => Some(r),
        }
    }

    pub fn side(&self) -> Option<PositionSide> {
        self.record().map(|r| r.side)
    }

    pub fn is_flat(&self) -> bool {
        matches!(self, PositionState::NoPosition)
    }
}

impl fmt::Display for PositionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionState::NoPosition => write!(f, "flat"),
            PositionState::Long(r) => write!(f, "long {} @ {:.4}", r.size, r.entry_price),
            PositionState::Short(r) => write!(f, "short {} @ {:.4}", r.size, r.entry_price),
        }
    }
}

/// Exchange-compliant order quantity for a target notional
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingResult {
    pub contracts: Decimal,
    pub notional: f64,
    pub required_margin: f64,
    /// Set when sizing failed and the minimal default was substituted
    pub is_default: bool,
}

impl SizingResult {
    pub fn contracts_f64(&self) -> f64 {
        self.contracts.to_f64().unwrap_or(0.0)
    }
}
