use clap::Parser;
use perpbot::config::{Credentials, TradeConfig};
use perpbot::exchange::OkxClient;
use perpbot::oracle::{ChatCompletionClient, DecisionOracle};
use perpbot::setup::prepare_exchange;
use perpbot::{CycleScheduler, Result, TradingBot};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Parser, Debug)]
#[command(name = "perpbot", about = "Signal-driven perpetual swap trading loop")]
struct Args {
    /// TOML file with trading parameters (default: ./perpbot.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Decide and log orders without submitting them
    #[arg(long)]
    test_mode: bool,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Leave position mode, leverage and pending orders untouched
    #[arg(long)]
    skip_setup: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let args = Args::parse();

    let mut config = TradeConfig::load(args.config.as_deref())?;
    if args.test_mode {
        config.test_mode = true;
    }
    let credentials = Credentials::from_env()?;

    tracing::info!("🚀 PerpBot starting");
    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Instrument: {} ({})", config.symbol, config.inst_id);
    tracing::info!("  Timeframe: {} x {} candles", config.timeframe, config.data_points);
    tracing::info!("  Target notional: {:.2} USDT at {}x", config.target_notional, config.leverage);
    tracing::info!("  Max position value: {:.2} USDT", config.max_position_value);
    tracing::info!("  Margin mode: {}", config.margin_mode.as_str());
    if config.test_mode {
        tracing::info!("  🧪 Test mode: orders are logged, not sent");
    }
    if credentials.simulated {
        tracing::info!("  Demo trading enabled");
    }

    let exchange = Arc::new(OkxClient::new(credentials.okx.clone())?.simulated(credentials.simulated));
    let oracle = ChatCompletionClient::new(credentials.oracle_api_key.clone(), credentials.oracle.clone())?;
    tracing::info!("  Oracle model: {}", oracle.model());
    let oracle: Arc<dyn DecisionOracle> = Arc::new(oracle);

    let cooldown = config.cooldown();
    let interval_minutes = config.interval_minutes;
    let bot = TradingBot::new(config, exchange, Some(oracle));

    if args.skip_setup {
        tracing::info!("Skipping exchange preparation");
    } else {
        prepare_exchange(&bot).await;
    }

    let bot = Arc::new(Mutex::new(bot));
    let scheduler = CycleScheduler::new(interval_minutes, cooldown);

    if args.once {
        let report = scheduler.run_guarded(&bot).await;
        tracing::info!("👋 Single cycle finished: {:?}", report.map(|r| r.orders_submitted));
        return Ok(());
    }

    tracing::info!("\nPress Ctrl+C to stop...\n");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
        }
        _ = scheduler.run(bot.clone()) => {
            tracing::error!("Scheduler exited");
        }
    }

    tracing::info!("👋 PerpBot stopped");
    Ok(())
}

fn setup_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("perpbot=info,perpbot::execution=debug"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
