use std::time::Duration;

use crate::bot::TradingBot;
use crate::exchange::{Exchange, MarginMode, PositionMode};
use crate::models::PositionSide;

/// Exchange rejects a position-mode change while orders or positions exist
pub const POSITION_MODE_BLOCKED: &str = "59000";
const POSITION_MODE_ATTEMPTS: u32 = 3;

/// Cancel pending orders and, with `flatten_on_start`, close live positions
pub async fn cleanup<E: Exchange>(bot: &TradingBot<E>) {
    let config = bot.config();
    let exchange = bot.exchange();

    match exchange.list_open_orders(&config.inst_id).await {
        Ok(orders) if orders.is_empty() => tracing::info!("No pending orders on {}", config.inst_id),
        Ok(orders) => {
            tracing::info!("Cancelling {} pending orders", orders.len());
            for order in orders {
                match exchange.cancel_order(&config.inst_id, &order.order_id).await {
                    Ok(ack) if ack.is_success() => tracing::info!("Cancelled order {}", order.order_id),
                    Ok(ack) => tracing::warn!(
                        "Cancel of {} rejected: {} {}",
                        order.order_id,
                        ack.code,
                        ack.msg
                    ),
                    Err(e) => tracing::warn!("Cancel of {} failed: {}", order.order_id, e),
                }
            }
        }
        Err(e) => tracing::warn!("Could not list pending orders: {}", e),
    }

    if !config.flatten_on_start {
        return;
    }

    let engine = bot.engine();
    match engine.account().current_position().await {
        Ok(Some(position)) => {
            tracing::info!("Flattening {} {} contracts", position.side, position.size);
            match engine.close_position(position.side, position.size).await {
                Ok((outcome, _)) if outcome.is_closed() => tracing::info!("✅ Position flattened"),
                Ok((outcome, _)) => tracing::warn!("Flatten not accepted: {:?}", outcome),
                Err(e) => tracing::warn!("Flatten failed: {}", e),
            }
        }
        Ok(None) => tracing::info!("No live position to flatten"),
        Err(e) => tracing::warn!("Could not read position before flattening: {}", e),
    }
}

/// One-time account preparation before the loop starts
///
/// Nothing here is fatal: every failure is logged and the loop starts
/// with whatever account settings the exchange currently has.
pub async fn prepare_exchange<E: Exchange>(bot: &TradingBot<E>) {
    let config = bot.config();
    let exchange = bot.exchange();
    let pause = Duration::from_secs(config.retry_delay_secs);

    tracing::info!("🔧 Preparing exchange account for {}", config.inst_id);
    cleanup(bot).await;

    for attempt in 1..=POSITION_MODE_ATTEMPTS {
        match exchange.set_position_mode(PositionMode::Hedge).await {
            Ok(ack) if ack.is_success() => {
                tracing::info!("✅ Hedge position mode set");
                break;
            }
            Ok(ack) if ack.code == POSITION_MODE_BLOCKED => {
                if attempt == POSITION_MODE_ATTEMPTS {
                    tracing::warn!("⚠️  Position mode still blocked, continuing in current mode");
                    break;
                }
                tracing::warn!(
                    "Position mode change blocked (attempt {}/{}), cleaning up",
                    attempt,
                    POSITION_MODE_ATTEMPTS
                );
                cleanup(bot).await;
                tokio::time::sleep(pause).await;
            }
            Ok(ack) => {
                tracing::warn!("Position mode change returned {} {}", ack.code, ack.msg);
                break;
            }
            Err(e) => {
                tracing::warn!(
                    "Position mode change failed: {} (attempt {}/{})",
                    e,
                    attempt,
                    POSITION_MODE_ATTEMPTS
                );
                if attempt < POSITION_MODE_ATTEMPTS {
                    tokio::time::sleep(pause).await;
                }
            }
        }
    }

    // Isolated margin in hedge mode takes leverage per position side
    let sides: Vec<Option<PositionSide>> = match config.margin_mode {
        MarginMode::Isolated => vec![Some(PositionSide::Long), Some(PositionSide::Short)],
        MarginMode::Cross => vec![None],
    };
    for side in sides {
        match exchange
            .set_leverage(&config.inst_id, config.leverage, config.margin_mode, side)
            .await
        {
            Ok(ack) if ack.is_success() => {
                tracing::info!("✅ Leverage {}x set ({:?})", config.leverage, side)
            }
            Ok(ack) => tracing::warn!("Leverage change returned {} {}", ack.code, ack.msg),
            Err(e) => tracing::warn!("Leverage change failed: {}", e),
        }
    }

    let balance = bot.engine().account().usdt_balance().await;
    tracing::info!("💰 USDT balance: {:.2}", balance);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TradeConfig;
    use crate::exchange::MemoryExchange;
    use std::sync::Arc;

    fn config(flatten: bool) -> TradeConfig {
        TradeConfig {
            flatten_on_start: flatten,
            retry_delay_secs: 0,
            close_settle_secs: 0,
            refresh_settle_secs: 0,
            ..TradeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_prepare_cancels_orders_and_sets_mode() {
        let exchange = Arc::new(MemoryExchange::new(Vec::new(), 25.0));
        exchange.add_open_order("a");
        exchange.add_open_order("b");
        let bot = TradingBot::new(config(false), exchange.clone(), None);

        prepare_exchange(&bot).await;

        assert_eq!(exchange.cancelled_orders(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(exchange.position_mode(), Some(PositionMode::Hedge));
        assert_eq!(exchange.leverage(), Some(10));
    }

    #[tokio::test]
    async fn test_position_blocks_mode_without_flatten() {
        let exchange = Arc::new(MemoryExchange::new(Vec::new(), 25.0));
        exchange.set_position(PositionSide::Long, 0.5, 100.0);
        let bot = TradingBot::new(config(false), exchange.clone(), None);

        prepare_exchange(&bot).await;

        assert_eq!(exchange.position_mode(), None);
        assert_eq!(exchange.position_size(PositionSide::Long), 0.5);
        assert_eq!(exchange.leverage(), Some(10));
    }

    #[tokio::test]
    async fn test_flatten_on_start_clears_position() {
        let exchange = Arc::new(MemoryExchange::new(Vec::new(), 25.0));
        exchange.set_position(PositionSide::Short, 0.5, 100.0);
        let bot = TradingBot::new(config(true), exchange.clone(), None);

        prepare_exchange(&bot).await;

        assert_eq!(exchange.position_size(PositionSide::Short), 0.0);
        assert_eq!(exchange.position_mode(), Some(PositionMode::Hedge));
        let orders = exchange.submitted_orders();
        assert_eq!(orders.len(), 1);
        assert!(orders[0].reduce_only);
    }
}
