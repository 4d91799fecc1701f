// Exchange trading API boundary
pub mod memory;
pub mod okx;

pub use memory::MemoryExchange;
pub use okx::{OkxClient, OkxCredentials};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{Candle, ContractSpec, OrderSide, PositionSide};

/// Status code the exchange uses for success
pub const SUCCESS_CODE: &str = "0";

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("exchange error {code}: {msg}")]
    Api { code: String, msg: String },
    #[error("malformed response: {0}")]
    Decode(String),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("{0}")]
    Unavailable(String),
}

impl From<serde_json::Error> for ExchangeError {
    fn from(e: serde_json::Error) -> Self {
        ExchangeError::Decode(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    Isolated,
    Cross,
}

impl MarginMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarginMode::Isolated => "isolated",
            MarginMode::Cross => "cross",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionMode {
    /// Long and short legs held separately, addressed by position side
    Hedge,
    /// Single signed position
    OneWay,
}

impl PositionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionMode::Hedge => "long_short_mode",
            PositionMode::OneWay => "net_mode",
        }
    }
}

/// Market order submission
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub inst_id: String,
    pub margin_mode: MarginMode,
    pub side: OrderSide,
    /// `None` submits without a position-side tag (one-way mode)
    pub pos_side: Option<PositionSide>,
    pub size: Decimal,
    pub reduce_only: bool,
    pub client_order_id: String,
}

impl OrderRequest {
    pub fn market(
        inst_id: &str,
        margin_mode: MarginMode,
        side: OrderSide,
        pos_side: Option<PositionSide>,
        size: Decimal,
    ) -> Self {
        Self {
            inst_id: inst_id.to_string(),
            margin_mode,
            side,
            pos_side,
            size,
            reduce_only: false,
            client_order_id: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }
}

/// Acknowledgment carried back from a write call
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub code: String,
    pub msg: String,
    pub order_id: Option<String>,
}

impl OrderAck {
    pub fn success(order_id: Option<String>) -> Self {
        Self {
            code: SUCCESS_CODE.to_string(),
            msg: String::new(),
            order_id,
        }
    }

    pub fn rejected(code: &str, msg: &str) -> Self {
        Self {
            code: code.to_string(),
            msg: msg.to_string(),
            order_id: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }
}

/// Position row as the exchange reports it, before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangePosition {
    pub inst_id: String,
    /// "long", "short" or "net"
    pub pos_side: String,
    /// Signed in net mode, positive per leg in hedge mode
    pub pos: f64,
    pub avg_px: f64,
    pub upl: f64,
    pub lever: Option<f64>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenOrder {
    pub order_id: String,
    pub inst_id: String,
    pub side: String,
    pub size: String,
}

/// Trading operations the engine depends on
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Closed candles, oldest first
    async fn fetch_candles(
        &self,
        inst_id: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    async fn fetch_contract_spec(&self, inst_id: &str) -> Result<ContractSpec, ExchangeError>;

    /// Available USDT usable as margin
    async fn fetch_usdt_balance(&self) -> Result<f64, ExchangeError>;

    async fn fetch_positions(&self, inst_id: &str) -> Result<Vec<ExchangePosition>, ExchangeError>;

    async fn list_open_orders(&self, inst_id: &str) -> Result<Vec<OpenOrder>, ExchangeError>;

    async fn cancel_order(&self, inst_id: &str, order_id: &str) -> Result<OrderAck, ExchangeError>;

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError>;

    async fn set_leverage(
        &self,
        inst_id: &str,
        leverage: u32,
        margin_mode: MarginMode,
        pos_side: Option<PositionSide>,
    ) -> Result<OrderAck, ExchangeError>;

    async fn set_position_mode(&self, mode: PositionMode) -> Result<OrderAck, ExchangeError>;
}
