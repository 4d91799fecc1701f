use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use super::{
    Exchange, ExchangeError, ExchangePosition, MarginMode, OpenOrder, OrderAck, OrderRequest,
    PositionMode,
};
use crate::models::{Candle, ContractSpec, OrderSide, PositionSide};

/// In-memory exchange that fills market orders instantly
///
/// Backs the integration tests and offline dry runs. Failure knobs make
/// individual calls error or reject so recovery paths can be exercised.
#[derive(Default)]
pub struct MemoryExchange {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    candles: Vec<Candle>,
    spec: Option<ContractSpec>,
    balance: Option<f64>,
    positions: Vec<ExchangePosition>,
    open_orders: Vec<OpenOrder>,
    submitted: Vec<OrderRequest>,
    cancelled: Vec<String>,
    scripted_codes: VecDeque<String>,
    candle_failures: u32,
    position_failures: u32,
    positions_visible_for: Option<u32>,
    position_mode: Option<PositionMode>,
    leverage: Option<u32>,
}

impl MemoryExchange {
    pub fn new(candles: Vec<Candle>, balance: f64) -> Self {
        let exchange = Self::default();
        {
            let mut state = exchange.lock();
            state.candles = candles;
            state.spec = Some(ContractSpec::default());
            state.balance = Some(balance);
        }
        exchange
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked mid-call
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_candles(&self, candles: Vec<Candle>) {
        self.lock().candles = candles;
    }

    /// `None` makes the balance query fail
    pub fn set_balance(&self, balance: Option<f64>) {
        self.lock().balance = balance;
    }

    /// `None` makes the instrument query fail
    pub fn set_contract_spec(&self, spec: Option<ContractSpec>) {
        self.lock().spec = spec;
    }

    pub fn set_position(&self, side: PositionSide, size: f64, entry_price: f64) {
        let mut state = self.lock();
        state.positions.retain(|p| p.pos_side != side.as_str());
        state.positions.push(ExchangePosition {
            inst_id: String::new(),
            pos_side: side.as_str().to_string(),
            pos: size,
            avg_px: entry_price,
            upl: 0.0,
            lever: Some(10.0),
            state: None,
        });
    }

    pub fn push_raw_position(&self, position: ExchangePosition) {
        self.lock().positions.push(position);
    }

    pub fn add_open_order(&self, order_id: &str) {
        self.lock().open_orders.push(OpenOrder {
            order_id: order_id.to_string(),
            inst_id: String::new(),
            side: "buy".to_string(),
            size: "1".to_string(),
        });
    }

    /// Queue acknowledgment codes for the next order submissions, in order
    pub fn script_order_codes(&self, codes: &[&str]) {
        self.lock()
            .scripted_codes
            .extend(codes.iter().map(|c| c.to_string()));
    }

    /// Fail the next `n` candle fetches
    pub fn fail_candles(&self, n: u32) {
        self.lock().candle_failures = n;
    }

    /// Fail the next `n` position queries
    pub fn fail_positions(&self, n: u32) {
        self.lock().position_failures = n;
    }

    /// Report no positions once `n` more position queries have been served
    ///
    /// Mimics a position endpoint that lags behind the order book.
    pub fn hide_positions_after(&self, n: u32) {
        self.lock().positions_visible_for = Some(n);
    }

    pub fn submitted_orders(&self) -> Vec<OrderRequest> {
        self.lock().submitted.clone()
    }

    pub fn cancelled_orders(&self) -> Vec<String> {
        self.lock().cancelled.clone()
    }

    pub fn open_order_count(&self) -> usize {
        self.lock().open_orders.len()
    }

    pub fn position_mode(&self) -> Option<PositionMode> {
        self.lock().position_mode
    }

    pub fn leverage(&self) -> Option<u32> {
        self.lock().leverage
    }

    /// Size of the live leg on `side`, 0 when none
    pub fn position_size(&self, side: PositionSide) -> f64 {
        self.lock()
            .positions
            .iter()
            .filter(|p| p.pos_side == side.as_str())
            .map(|p| p.pos)
            .sum()
    }

    fn fill(state: &mut MemoryState, order: &OrderRequest) {
        let size = order.size.to_f64().unwrap_or(0.0);
        let price = state.candles.last().map(|c| c.close).unwrap_or(0.0);

        let leg = match order.pos_side {
            Some(side) => side,
            // One-way orders reduce whatever leg is open, otherwise open by side
            None => match state.positions.first() {
                Some(p) if order.reduce_only && p.pos_side == "short" => PositionSide::Short,
                Some(_) if order.reduce_only => PositionSide::Long,
                _ if order.side == OrderSide::Buy => PositionSide::Long,
                _ => PositionSide::Short,
            },
        };

        let existing = state
            .positions
            .iter_mut()
            .find(|p| p.pos_side == leg.as_str());

        if order.reduce_only {
            if let Some(position) = existing {
                position.pos -= size;
            }
            state.positions.retain(|p| p.pos > 1e-12);
            return;
        }

        match existing {
            Some(position) => {
                let total = position.pos + size;
                position.avg_px = (position.avg_px * position.pos + price * size) / total;
                position.pos = total;
            }
            None => state.positions.push(ExchangePosition {
                inst_id: order.inst_id.clone(),
                pos_side: leg.as_str().to_string(),
                pos: size,
                avg_px: price,
                upl: 0.0,
                lever: state.leverage.map(f64::from),
                state: None,
            }),
        }
    }
}

#[async_trait]
impl Exchange for MemoryExchange {
    async fn fetch_candles(&self, _inst_id: &str, _timeframe: &str, limit: usize) -> Result<Vec<Candle>, ExchangeError> {
        let mut state = self.lock();
        if state.candle_failures > 0 {
            state.candle_failures -= 1;
            return Err(ExchangeError::Unavailable("candle feed down".to_string()));
        }
        let start = state.candles.len().saturating_sub(limit);
        Ok(state.candles[start..].to_vec())
    }

    async fn fetch_contract_spec(&self, inst_id: &str) -> Result<ContractSpec, ExchangeError> {
        self.lock()
            .spec
            .ok_or_else(|| ExchangeError::Unavailable(format!("no instrument {}", inst_id)))
    }

    async fn fetch_usdt_balance(&self) -> Result<f64, ExchangeError> {
        self.lock()
            .balance
            .ok_or_else(|| ExchangeError::Unavailable("balance service down".to_string()))
    }

    async fn fetch_positions(&self, inst_id: &str) -> Result<Vec<ExchangePosition>, ExchangeError> {
        let mut state = self.lock();
        if state.position_failures > 0 {
            state.position_failures -= 1;
            return Err(ExchangeError::Unavailable("positions down".to_string()));
        }
        match state.positions_visible_for {
            Some(0) => return Ok(Vec::new()),
            Some(n) => state.positions_visible_for = Some(n - 1),
            None => {}
        }
        Ok(state
            .positions
            .iter()
            .cloned()
            .map(|mut p| {
                if p.inst_id.is_empty() {
                    p.inst_id = inst_id.to_string();
                }
                p
            })
            .collect())
    }

    async fn list_open_orders(&self, _inst_id: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        Ok(self.lock().open_orders.clone())
    }

    async fn cancel_order(&self, _inst_id: &str, order_id: &str) -> Result<OrderAck, ExchangeError> {
        let mut state = self.lock();
        let before = state.open_orders.len();
        state.open_orders.retain(|o| o.order_id != order_id);
        if state.open_orders.len() == before {
            return Ok(OrderAck::rejected("51400", "order does not exist"));
        }
        state.cancelled.push(order_id.to_string());
        Ok(OrderAck::success(Some(order_id.to_string())))
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        let mut state = self.lock();
        state.submitted.push(order.clone());

        let code = state
            .scripted_codes
            .pop_front()
            .unwrap_or_else(|| super::SUCCESS_CODE.to_string());
        if code != super::SUCCESS_CODE {
            return Ok(OrderAck::rejected(&code, "scripted rejection"));
        }

        Self::fill(&mut state, order);
        let order_id = format!("mem-{}", state.submitted.len());
        Ok(OrderAck::success(Some(order_id)))
    }

    async fn set_leverage(
        &self,
        _inst_id: &str,
        leverage: u32,
        _margin_mode: MarginMode,
        _pos_side: Option<PositionSide>,
    ) -> Result<OrderAck, ExchangeError> {
        self.lock().leverage = Some(leverage);
        Ok(OrderAck::success(None))
    }

    async fn set_position_mode(&self, mode: PositionMode) -> Result<OrderAck, ExchangeError> {
        let mut state = self.lock();
        // Same rule as OKX: no mode switch with live orders or positions
        if !state.open_orders.is_empty() || !state.positions.is_empty() {
            return Ok(OrderAck::rejected("59000", "cancel orders and close positions first"));
        }
        state.position_mode = Some(mode);
        Ok(OrderAck::success(None))
    }
}
