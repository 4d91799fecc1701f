use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

use super::account::AccountState;
use super::sizing::PositionSizer;
use crate::exchange::{Exchange, ExchangeError, MarginMode, OrderAck, OrderRequest};
use crate::models::{
    Action, Confidence, PositionRecord, PositionSide, PositionState, Signal, SizingResult,
};
use crate::risk::{ExposureCheck, RiskGateTrip, RiskLimits};

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionAction {
    /// Nothing to do for this signal and position
    Hold,
    /// A risk gate refused the trade
    Skip(RiskGateTrip),
    Open { side: PositionSide, contracts: Decimal },
    Add { side: PositionSide, contracts: Decimal },
    Flip {
        from: PositionSide,
        close_size: f64,
        contracts: Decimal,
    },
}

#[derive(Debug, Clone)]
pub struct ExecutionDecision {
    pub action: ExecutionAction,
    pub reason: String,
    pub sizing: Option<SizingResult>,
}

impl ExecutionDecision {
    fn hold(reason: impl Into<String>) -> Self {
        Self {
            action: ExecutionAction::Hold,
            reason: reason.into(),
            sizing: None,
        }
    }

    fn skip(trip: RiskGateTrip, sizing: Option<SizingResult>) -> Self {
        Self {
            reason: format!("Risk gate: {}", trip),
            action: ExecutionAction::Skip(trip),
            sizing,
        }
    }
}

/// What the signal asks for given the current position, before any gate
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    None(&'static str),
    Open(PositionSide),
    Add(PositionRecord),
    Flip(PositionRecord),
}

/// The position transition table
pub fn plan_transition(
    action: Action,
    position: &PositionState,
    allow_pyramiding: bool,
) -> Transition {
    let wanted = match action {
        Action::Hold => return Transition::None("Hold signal"),
        Action::Buy => PositionSide::Long,
        Action::Sell => PositionSide::Short,
    };

    match position.record() {
        None => Transition::Open(wanted),
        Some(record) if record.side == wanted => {
            if allow_pyramiding {
                Transition::Add(record.clone())
            } else {
                Transition::None("Already positioned in signal direction")
            }
        }
        Some(record) => Transition::Flip(record.clone()),
    }
}

/// Result of the single close-position operation
#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    /// A close order was acknowledged with the success code
    Closed,
    Rejected { code: String, msg: String },
}

impl CloseOutcome {
    pub fn is_closed(&self) -> bool {
        matches!(self, CloseOutcome::Closed)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionSettings {
    pub inst_id: String,
    pub margin_mode: MarginMode,
    pub leverage: u32,
    pub target_notional: f64,
    pub test_mode: bool,
    pub allow_pyramiding: bool,
    /// Wait between the close and the open of a flip
    pub close_settle: Duration,
    /// Wait before reading the position back after trading
    pub refresh_settle: Duration,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            inst_id: "OKB-USDT-SWAP".to_string(),
            margin_mode: MarginMode::Isolated,
            leverage: 10,
            target_notional: 5.0,
            test_mode: false,
            allow_pyramiding: false,
            close_settle: Duration::from_secs(2),
            refresh_settle: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub decision: ExecutionDecision,
    pub orders_submitted: usize,
    /// `None` when the post-trade refresh failed
    pub position_after: Option<PositionState>,
}

/// Reconciles signals with the live position and submits gated orders
pub struct ExecutionEngine<E: Exchange> {
    exchange: Arc<E>,
    account: AccountState<E>,
    sizer: PositionSizer,
    limits: RiskLimits,
    settings: ExecutionSettings,
    last_position: Option<PositionState>,
}

impl<E: Exchange> ExecutionEngine<E> {
    pub fn new(
        exchange: Arc<E>,
        account: AccountState<E>,
        limits: RiskLimits,
        settings: ExecutionSettings,
    ) -> Self {
        Self {
            exchange,
            account,
            sizer: PositionSizer::new(),
            limits,
            settings,
            last_position: None,
        }
    }

    pub fn account(&self) -> &AccountState<E> {
        &self.account
    }

    /// Position as read back after the last cycle
    pub fn last_position(&self) -> Option<&PositionState> {
        self.last_position.as_ref()
    }

    /// Derive the decision for `signal` without submitting anything
    pub async fn decide(
        &self,
        signal: &Signal,
        price: f64,
    ) -> Result<(ExecutionDecision, PositionState), ExchangeError> {
        let position = self.account.position_state().await?;
        tracing::info!("📍 Current position: {}", position);

        let transition = plan_transition(signal.action, &position, self.settings.allow_pyramiding);
        if let Transition::None(reason) = transition {
            return Ok((ExecutionDecision::hold(reason), position));
        }

        // Nothing is sent on a low-confidence signal, not even a close
        if signal.confidence == Confidence::Low {
            return Ok((ExecutionDecision::skip(RiskGateTrip::LowConfidence, None), position));
        }

        let balance = self.account.usdt_balance().await;
        let spec = self.account.contract_spec().await;
        let sizing = self
            .sizer
            .size(price, self.settings.target_notional, &spec, self.settings.leverage);

        let existing_same_side_notional = match &transition {
            Transition::Add(record) => Some(spec.notional(record.size, price)),
            _ => None,
        };

        let check = ExposureCheck {
            confidence: signal.confidence,
            sizing: &sizing,
            available_balance: balance,
            existing_same_side_notional,
        };
        if let Err(trip) = self.limits.check(&check) {
            return Ok((ExecutionDecision::skip(trip, Some(sizing)), position));
        }

        let decision = match transition {
            Transition::Open(side) => ExecutionDecision {
                action: ExecutionAction::Open {
                    side,
                    contracts: sizing.contracts,
                },
                reason: format!("{} signal with no position", signal.action),
                sizing: Some(sizing),
            },
            Transition::Add(record) => ExecutionDecision {
                action: ExecutionAction::Add {
                    side: record.side,
                    contracts: sizing.contracts,
                },
                reason: format!("Adding to {} position", record.side),
                sizing: Some(sizing),
            },
            Transition::Flip(record) => ExecutionDecision {
                action: ExecutionAction::Flip {
                    from: record.side,
                    close_size: record.size,
                    contracts: sizing.contracts,
                },
                reason: format!("{} signal against {} position", signal.action, record.side),
                sizing: Some(sizing),
            },
            Transition::None(reason) => ExecutionDecision::hold(reason),
        };

        Ok((decision, position))
    }

    /// Decide, then carry the decision out against the exchange
    pub async fn execute(
        &mut self,
        signal: &Signal,
        price: f64,
    ) -> Result<ExecutionOutcome, ExchangeError> {
        tracing::info!(
            "📈 Signal {} ({}), price {:.4}",
            signal.action,
            signal.confidence,
            price
        );

        let (decision, position) = self.decide(signal, price).await?;
        let mut orders_submitted = 0;

        let traded = match &decision.action {
            ExecutionAction::Hold => {
                tracing::info!("⏸️  {}", decision.reason);
                false
            }
            ExecutionAction::Skip(_) => {
                tracing::warn!("⚠️  {}", decision.reason);
                false
            }
            action if self.settings.test_mode => {
                tracing::info!("🧪 Test mode, not submitting: {:?}", action);
                false
            }
            ExecutionAction::Open { side, contracts } | ExecutionAction::Add { side, contracts } => {
                let ack = self.open(*side, *contracts).await?;
                orders_submitted += 1;
                ack.is_success()
            }
            ExecutionAction::Flip {
                from,
                close_size,
                contracts,
            } => {
                let (outcome, close_orders) = self.close_position(*from, *close_size).await?;
                orders_submitted += close_orders;

                // Only a success acknowledgment releases the opening leg
                if outcome.is_closed() {
                    tokio::time::sleep(self.settings.close_settle).await;
                    self.open(from.opposite(), *contracts).await?;
                    orders_submitted += 1;
                } else {
                    tracing::error!(
                        "❌ Close of {} position failed ({:?}), not opening {}",
                        from,
                        outcome,
                        from.opposite()
                    );
                }
                true
            }
        };

        let position_after = if traded || orders_submitted > 0 {
            tokio::time::sleep(self.settings.refresh_settle).await;
            match self.account.position_state().await {
                Ok(state) => {
                    tracing::info!("📍 Position after execution: {}", state);
                    Some(state)
                }
                Err(e) => {
                    tracing::warn!("Position refresh failed: {}", e);
                    None
                }
            }
        } else {
            Some(position)
        };

        self.last_position = position_after.clone();

        Ok(ExecutionOutcome {
            decision,
            orders_submitted,
            position_after,
        })
    }

    async fn submit(&self, order: &OrderRequest) -> Result<OrderAck, ExchangeError> {
        tracing::debug!(
            "Submitting {} {} {:?} size {} reduce_only={} clOrdId={}",
            order.inst_id,
            order.side.as_str(),
            order.pos_side,
            order.size,
            order.reduce_only,
            order.client_order_id
        );

        let ack = self.exchange.place_order(order).await?;
        if ack.is_success() {
            tracing::info!(
                "✅ Order accepted: {} {} (id {:?})",
                order.side.as_str(),
                order.size,
                ack.order_id
            );
        } else {
            tracing::error!(
                "❌ Order rejected: code {} msg {} ({} {})",
                ack.code,
                ack.msg,
                order.side.as_str(),
                order.size
            );
        }
        Ok(ack)
    }

    async fn open(&self, side: PositionSide, contracts: Decimal) -> Result<OrderAck, ExchangeError> {
        tracing::info!("🚀 Opening {} {} contracts", side, contracts);
        let order = OrderRequest::market(
            &self.settings.inst_id,
            self.settings.margin_mode,
            side.opening_order_side(),
            Some(side),
            contracts,
        );
        self.submit(&order).await
    }

    /// Reduce-only close of the whole `side` position
    ///
    /// Tries the hedge-mode order first. If that is not accepted and the
    /// position is still there, retries once without the position-side tag
    /// for accounts in one-way mode. Only a success acknowledgment counts
    /// as closed; a position that merely stops showing up does not.
    /// Returns the outcome and the number of orders sent.
    pub async fn close_position(
        &self,
        side: PositionSide,
        size: f64,
    ) -> Result<(CloseOutcome, usize), ExchangeError> {
        let contracts = match Decimal::from_f64(size) {
            Some(d) if d > Decimal::ZERO => d.normalize(),
            _ => {
                return Ok((
                    CloseOutcome::Rejected {
                        code: "size".to_string(),
                        msg: format!("unrepresentable close size {}", size),
                    },
                    0,
                ))
            }
        };

        tracing::info!("🔻 Closing {} {} contracts", side, contracts);

        let hedge = OrderRequest::market(
            &self.settings.inst_id,
            self.settings.margin_mode,
            side.closing_order_side(),
            Some(side),
            contracts,
        )
        .reduce_only();

        let first_error = match self.submit(&hedge).await {
            Ok(ack) if ack.is_success() => return Ok((CloseOutcome::Closed, 1)),
            Ok(ack) => CloseOutcome::Rejected {
                code: ack.code,
                msg: ack.msg,
            },
            Err(e) => CloseOutcome::Rejected {
                code: "transport".to_string(),
                msg: e.to_string(),
            },
        };

        // The position endpoint can lag the order, so a missing leg proves nothing
        match self.account.current_position().await? {
            Some(record) if record.side == side => {}
            _ => {
                tracing::warn!(
                    "Close of {} rejected ({:?}) and position no longer reported, not retrying",
                    side,
                    first_error
                );
                return Ok((first_error, 1));
            }
        }

        tracing::warn!("Hedge-mode close not accepted ({:?}), trying one-way close", first_error);
        let net = OrderRequest::market(
            &self.settings.inst_id,
            self.settings.margin_mode,
            side.closing_order_side(),
            None,
            contracts,
        )
        .reduce_only();

        let ack = self.submit(&net).await?;
        if ack.is_success() {
            Ok((CloseOutcome::Closed, 2))
        } else {
            Ok((
                CloseOutcome::Rejected {
                    code: ack.code,
                    msg: ack.msg,
                },
                2,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MemoryExchange;
    use crate::models::{Candle, OrderSide};
    use crate::retry::RetryPolicy;
    use chrono::Utc;

    const INST: &str = "OKB-USDT-SWAP";

    fn signal(action: Action, confidence: Confidence) -> Signal {
        Signal {
            action,
            reason: "test".to_string(),
            stop_loss: 95.0,
            take_profit: 105.0,
            confidence,
            is_fallback: false,
            timestamp: Utc::now(),
        }
    }

    fn candle(price: f64) -> Candle {
        Candle {
            timestamp: Utc::now(),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1.0,
        }
    }

    fn engine(exchange: Arc<MemoryExchange>, settings: ExecutionSettings) -> ExecutionEngine<MemoryExchange> {
        let account = AccountState::new(exchange.clone(), INST, RetryPolicy::new(3, Duration::ZERO), 10.0);
        ExecutionEngine::new(exchange, account, RiskLimits::default(), settings)
    }

    fn fast_settings() -> ExecutionSettings {
        ExecutionSettings {
            close_settle: Duration::ZERO,
            refresh_settle: Duration::ZERO,
            ..ExecutionSettings::default()
        }
    }

    fn long(size: f64) -> PositionState {
        PositionState::Long(PositionRecord {
            side: PositionSide::Long,
            size,
            entry_price: 100.0,
            unrealized_pnl: 0.0,
            leverage: 10.0,
            state: "live".to_string(),
        })
    }

    #[test]
    fn test_transition_table() {
        let flat = PositionState::NoPosition;
        let long = long(0.5);

        assert_eq!(plan_transition(Action::Buy, &flat, false), Transition::Open(PositionSide::Long));
        assert_eq!(plan_transition(Action::Sell, &flat, false), Transition::Open(PositionSide::Short));
        assert!(matches!(plan_transition(Action::Hold, &flat, false), Transition::None(_)));
        assert!(matches!(plan_transition(Action::Buy, &long, false), Transition::None(_)));
        assert!(matches!(plan_transition(Action::Hold, &long, false), Transition::None(_)));
        assert!(matches!(plan_transition(Action::Sell, &long, false), Transition::Flip(ref r) if r.side == PositionSide::Long));
        assert!(matches!(plan_transition(Action::Buy, &long, true), Transition::Add(_)));
    }

    #[tokio::test]
    async fn test_opens_short_from_flat() {
        let exchange = Arc::new(MemoryExchange::new(vec![candle(100.0)], 100.0));
        let mut engine = engine(exchange.clone(), fast_settings());

        let outcome = engine.execute(&signal(Action::Sell, Confidence::High), 100.0).await.unwrap();

        assert_eq!(outcome.orders_submitted, 1);
        assert!(matches!(outcome.decision.action, ExecutionAction::Open { side: PositionSide::Short, .. }));
        let orders = exchange.submitted_orders();
        assert_eq!(orders[0].side, OrderSide::Sell);
        assert_eq!(orders[0].pos_side, Some(PositionSide::Short));
        assert_eq!(orders[0].size, Decimal::new(5, 1));
        assert!(!orders[0].reduce_only);
        assert!(matches!(outcome.position_after, Some(PositionState::Short(_))));
    }

    #[tokio::test]
    async fn test_low_confidence_sends_nothing() {
        let exchange = Arc::new(MemoryExchange::new(vec![candle(100.0)], 100.0));
        exchange.set_position(PositionSide::Long, 0.5, 100.0);
        let mut engine = engine(exchange.clone(), fast_settings());

        for action in [Action::Buy, Action::Sell] {
            let outcome = engine.execute(&signal(action, Confidence::Low), 100.0).await.unwrap();
            assert_eq!(outcome.orders_submitted, 0);
        }
        assert!(exchange.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn test_margin_gate_blocks_open() {
        // 0.5 USDT margin against 60% of 0.5 USDT
        let exchange = Arc::new(MemoryExchange::new(vec![candle(100.0)], 0.5));
        let mut engine = engine(exchange.clone(), fast_settings());

        let outcome = engine.execute(&signal(Action::Buy, Confidence::High), 100.0).await.unwrap();

        assert!(matches!(
            outcome.decision.action,
            ExecutionAction::Skip(RiskGateTrip::InsufficientMargin { .. })
        ));
        assert!(exchange.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn test_default_sizing_never_opens() {
        let exchange = Arc::new(MemoryExchange::new(vec![candle(100.0)], 100.0));
        let mut engine = engine(exchange.clone(), fast_settings());

        let outcome = engine.execute(&signal(Action::Buy, Confidence::High), f64::NAN).await.unwrap();

        assert!(matches!(outcome.decision.action, ExecutionAction::Skip(RiskGateTrip::DefaultSizing)));
        assert!(exchange.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn test_flip_closes_then_opens() {
        let exchange = Arc::new(MemoryExchange::new(vec![candle(100.0)], 100.0));
        exchange.set_position(PositionSide::Long, 0.5, 100.0);
        let mut engine = engine(exchange.clone(), fast_settings());

        let outcome = engine.execute(&signal(Action::Sell, Confidence::Medium), 100.0).await.unwrap();

        let orders = exchange.submitted_orders();
        assert_eq!(orders.len(), 2);
        assert!(orders[0].reduce_only);
        assert_eq!(orders[0].side, OrderSide::Sell);
        assert_eq!(orders[0].pos_side, Some(PositionSide::Long));
        assert!(!orders[1].reduce_only);
        assert_eq!(orders[1].pos_side, Some(PositionSide::Short));
        assert_eq!(outcome.orders_submitted, 2);
        assert!(matches!(outcome.position_after, Some(PositionState::Short(_))));
    }

    #[tokio::test]
    async fn test_flip_uses_one_way_close_when_hedge_rejected() {
        let exchange = Arc::new(MemoryExchange::new(vec![candle(100.0)], 100.0));
        exchange.set_position(PositionSide::Short, 0.5, 100.0);
        exchange.script_order_codes(&["51000"]);
        let mut engine = engine(exchange.clone(), fast_settings());

        let outcome = engine.execute(&signal(Action::Buy, Confidence::High), 100.0).await.unwrap();

        let orders = exchange.submitted_orders();
        assert_eq!(orders.len(), 3);
        assert_eq!(orders[1].pos_side, None);
        assert!(orders[1].reduce_only);
        assert_eq!(orders[2].pos_side, Some(PositionSide::Long));
        assert_eq!(outcome.orders_submitted, 3);
    }

    #[tokio::test]
    async fn test_failed_close_aborts_open() {
        let exchange = Arc::new(MemoryExchange::new(vec![candle(100.0)], 100.0));
        exchange.set_position(PositionSide::Long, 0.5, 100.0);
        exchange.script_order_codes(&["51000", "51000"]);
        let mut engine = engine(exchange.clone(), fast_settings());

        engine.execute(&signal(Action::Sell, Confidence::High), 100.0).await.unwrap();

        let orders = exchange.submitted_orders();
        assert!(orders.iter().all(|o| o.reduce_only));
        assert_eq!(exchange.position_size(PositionSide::Long), 0.5);
        assert_eq!(exchange.position_size(PositionSide::Short), 0.0);
    }

    #[tokio::test]
    async fn test_rejected_close_with_lagging_position_never_opens() {
        let exchange = Arc::new(MemoryExchange::new(vec![candle(100.0)], 100.0));
        exchange.set_position(PositionSide::Long, 0.5, 100.0);
        exchange.script_order_codes(&["51000", "51000"]);
        // Long is reported to the decision, then the endpoint shows nothing
        exchange.hide_positions_after(1);
        let mut engine = engine(exchange.clone(), fast_settings());

        let outcome = engine.execute(&signal(Action::Sell, Confidence::High), 100.0).await.unwrap();

        let orders = exchange.submitted_orders();
        assert_eq!(orders.len(), 1);
        assert!(orders[0].reduce_only);
        assert_eq!(orders[0].pos_side, Some(PositionSide::Long));
        assert!(orders.iter().all(|o| o.reduce_only), "opening order sent after a failed close");
        assert_eq!(outcome.orders_submitted, 1);
    }

    #[tokio::test]
    async fn test_close_position_reports_rejection_code() {
        let exchange = Arc::new(MemoryExchange::new(vec![candle(100.0)], 100.0));
        exchange.set_position(PositionSide::Short, 0.5, 100.0);
        exchange.script_order_codes(&["51000"]);
        exchange.hide_positions_after(0);
        let engine = engine(exchange.clone(), fast_settings());

        let (outcome, orders) = engine.close_position(PositionSide::Short, 0.5).await.unwrap();

        assert!(!outcome.is_closed());
        assert!(matches!(outcome, CloseOutcome::Rejected { ref code, .. } if code == "51000"));
        assert_eq!(orders, 1);
    }

    #[tokio::test]
    async fn test_test_mode_submits_nothing() {
        let exchange = Arc::new(MemoryExchange::new(vec![candle(100.0)], 100.0));
        let settings = ExecutionSettings {
            test_mode: true,
            ..fast_settings()
        };
        let mut engine = engine(exchange.clone(), settings);

        let outcome = engine.execute(&signal(Action::Buy, Confidence::High), 100.0).await.unwrap();

        assert!(matches!(outcome.decision.action, ExecutionAction::Open { .. }));
        assert_eq!(outcome.orders_submitted, 0);
        assert!(exchange.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn test_pyramiding_respects_combined_exposure() {
        let exchange = Arc::new(MemoryExchange::new(vec![candle(100.0)], 1_000.0));
        // 9.8 contracts * 0.1 * 100 = 98 USDT already held
        exchange.set_position(PositionSide::Long, 9.8, 100.0);
        let settings = ExecutionSettings {
            allow_pyramiding: true,
            ..fast_settings()
        };
        let mut engine = engine(exchange.clone(), settings);

        let outcome = engine.execute(&signal(Action::Buy, Confidence::High), 100.0).await.unwrap();

        assert!(matches!(
            outcome.decision.action,
            ExecutionAction::Skip(RiskGateTrip::CombinedExposure { .. })
        ));
        assert!(exchange.submitted_orders().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_open_leaves_state() {
        let exchange = Arc::new(MemoryExchange::new(vec![candle(100.0)], 100.0));
        exchange.script_order_codes(&["51008"]);
        let mut engine = engine(exchange.clone(), fast_settings());

        let outcome = engine.execute(&signal(Action::Buy, Confidence::High), 100.0).await.unwrap();

        assert_eq!(outcome.orders_submitted, 1);
        assert_eq!(outcome.position_after, Some(PositionState::NoPosition));
    }
}
