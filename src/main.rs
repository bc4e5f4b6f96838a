use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use fvg_engine::execution::PaperBroker;
use fvg_engine::streams::{self, AppState};
use fvg_engine::trading_core::{EngineConfig, SignalBus, TradeLogger, TradingOrchestrator};

#[derive(Parser, Debug)]
#[command(name = "fvg-engine")]
#[command(about = "Fair value gap signal engine with trend filter and operator confirmation")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Paper trade a bar series at the configured cadence with the WebSocket dashboard
    Serve {
        /// CSV of bars (timestamp,open,high,low,close)
        #[arg(short, long, env = "FVG_BARS")]
        bars: PathBuf,

        /// Engine config JSON (missing fields use defaults)
        #[arg(short, long, env = "FVG_CONFIG")]
        config: Option<PathBuf>,

        /// Port to run the web server on
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Static frontend directory
        #[arg(long)]
        frontend: Option<PathBuf>,

        /// Trade log CSV (appended)
        #[arg(long, default_value = "trade_log.csv")]
        trade_log: PathBuf,

        /// Starting paper cash
        #[arg(long, default_value = "100000.0")]
        cash: f64,

        /// Override the symbol from the config
        #[arg(short, long)]
        symbol: Option<String>,

        /// Override seconds between ticks
        #[arg(long)]
        tick_secs: Option<u64>,
    },

    /// Run the engine over a bar series with confirmations off and print a summary
    Backtest {
        /// CSV of bars (timestamp,open,high,low,close)
        #[arg(short, long, env = "FVG_BARS")]
        bars: PathBuf,

        /// Engine config JSON (defaults to the backtest preset)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Trade log CSV (appended)
        #[arg(long)]
        trade_log: Option<PathBuf>,

        /// Starting paper cash
        #[arg(long, default_value = "100000.0")]
        cash: f64,

        /// Override the symbol from the config
        #[arg(short, long)]
        symbol: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fvg_engine=info".parse()?),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Serve {
            bars,
            config,
            port,
            frontend,
            trade_log,
            cash,
            symbol,
            tick_secs,
        } => {
            let mut config = load_config(config.as_deref(), EngineConfig::default())?;
            if let Some(symbol) = symbol {
                config.symbol = symbol;
            }
            if let Some(secs) = tick_secs {
                config.tick_interval_secs = secs;
            }
            config.validate()?;
            serve(config, &bars, port, frontend, &trade_log, cash).await
        }
        Commands::Backtest {
            bars,
            config,
            trade_log,
            cash,
            symbol,
        } => {
            let mut config = load_config(config.as_deref(), EngineConfig::backtest())?;
            if let Some(symbol) = symbol {
                config.symbol = symbol;
            }
            config.validate()?;
            backtest(config, &bars, trade_log.as_deref(), cash).await
        }
    }
}

fn load_config(path: Option<&Path>, fallback: EngineConfig) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_json_file(path),
        None => Ok(fallback),
    }
}

async fn serve(
    config: EngineConfig,
    bars_path: &Path,
    port: u16,
    frontend: Option<PathBuf>,
    trade_log: &Path,
    cash: f64,
) -> Result<()> {
    info!("Starting FVG engine server");
    info!("Symbol: {}", config.symbol);
    info!("Port: {}", port);
    info!(
        "Confirmations: entry={} exit={} (timeout {:?})",
        config.require_entry_confirmation,
        config.require_exit_confirmation,
        config.confirmation_timeout()
    );

    let bars = streams::load_bars(bars_path)?;
    let broker = PaperBroker::new(&config.symbol, bars, cash)
        .preload(config.history_bars.saturating_sub(1));
    let logger = TradeLogger::open(trade_log)
        .with_context(|| format!("Failed to open trade log {:?}", trade_log))?;

    let bus = SignalBus::new();
    let (inbound, inbox) = mpsc::unbounded_channel();
    let state = AppState {
        bus: bus.clone(),
        inbound,
    };

    tokio::spawn(async move {
        if let Err(e) = streams::serve(state, port, frontend).await {
            error!("Server error: {:#}", e);
        }
    });

    let mut engine = TradingOrchestrator::new(config, broker, bus, inbox).with_trade_logger(logger);

    let finished = tokio::select! {
        result = engine.run() => Some(result?),
        _ = tokio::signal::ctrl_c() => None,
    };

    match finished {
        Some(summary) => info!("Run complete | {}", summary),
        None => {
            warn!("Interrupted, shutting down");
            info!("Stopped | {}", engine.summary().await?);
        }
    }

    Ok(())
}

async fn backtest(
    config: EngineConfig,
    bars_path: &Path,
    trade_log: Option<&Path>,
    cash: f64,
) -> Result<()> {
    info!("Backtesting {} from {:?}", config.symbol, bars_path);

    let bars = streams::load_bars(bars_path)?;
    let broker = PaperBroker::new(&config.symbol, bars, cash)
        .preload(config.history_bars.saturating_sub(1));

    // Nobody is listening; the sender only keeps the queue open
    let (_inbound, inbox) = mpsc::unbounded_channel();
    let mut engine = TradingOrchestrator::new(config, broker, SignalBus::new(), inbox);
    if let Some(path) = trade_log {
        engine = engine.with_trade_logger(TradeLogger::open(path)?);
    }

    let summary = engine.run_to_completion().await?;

    info!("=== BACKTEST SUMMARY ===");
    info!("Fills: {}", summary.fills);
    info!("Round trips: {} ({} W / {} L)", summary.round_trips, summary.wins, summary.losses);
    info!("Win rate: {:.1}%", summary.win_rate() * 100.0);
    info!("Realized P&L: ${:.2}", summary.realized_pl);
    info!("Final portfolio: ${:.2}", summary.final_portfolio_value);
    if summary.halted {
        warn!("Run ended in emergency halt");
    }
    Ok(())
}
