use anyhow::Result;
use clap::{Parser, Subcommand};
use pulse_trade_broker::manager::ConnectionManager;
use pulse_trade_broker::paper::PaperFactory;
use pulse_trade_broker::transport::{TransportFactory, WsFactory};
use pulse_trade_core::circuit_breaker::CircuitBreaker;
use pulse_trade_core::config::AppConfig;
use pulse_trade_core::store::{
    InMemoryPositionStore, InMemoryTraderDirectory, MarketDataSource, PositionStore,
    TraderDirectory,
};
use pulse_trade_core::types::TradingParams;
use pulse_trade_engine::{EngineService, ExecutionPipeline};
use pulse_trade_scanner::{BrokerMarketData, DebounceMap, HttpAdvisor, Scanner, SignalAdvisor};
use pulse_trade_web_api::{ApiServer, ApiState};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "pulse-trade")]
#[command(about = "Automated short-duration derivative trading pipeline", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline (scanner, engine, operational API)
    Run {
        /// Force the in-process paper broker regardless of config
        #[arg(long)]
        paper: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { paper } => {
            let mut config = AppConfig::load()?;
            if paper {
                config.broker.paper = true;
            }

            if config.broker.paper {
                tracing::info!("running against the in-process paper broker");
                run(config, PaperFactory::new(), true).await
            } else {
                let factory = WsFactory::new(config.broker.ws_url.clone());
                run(config, factory, false).await
            }
        }
    }
}

/// Builds every service once and wires them together by handle; nothing in
/// the pipeline reaches for ambient global state.
async fn run<F: TransportFactory>(config: AppConfig, factory: F, seed_demo: bool) -> Result<()> {
    let broker_breaker = Arc::new(CircuitBreaker::new("broker", config.broker.breaker.clone()));
    let advisor_breaker = Arc::new(CircuitBreaker::new(
        "advisor",
        config.scanner.advisor_breaker.clone(),
    ));

    let positions = Arc::new(InMemoryPositionStore::new());
    let directory = Arc::new(InMemoryTraderDirectory::new());
    if seed_demo {
        // A paper run needs someone to trade for.
        directory
            .register("demo-trader", "demo-token", TradingParams::default())
            .await;
        tracing::info!("registered demo-trader for the paper run");
    }

    let manager = Arc::new(ConnectionManager::new(
        factory,
        Arc::clone(&broker_breaker),
        Duration::from_secs(config.broker.call_timeout_secs),
    ));
    let market: Arc<dyn MarketDataSource> =
        Arc::new(BrokerMarketData::new(Arc::clone(&manager), 60));
    let debounce = Arc::new(DebounceMap::new(Duration::from_secs(
        config.scanner.debounce_ttl_secs,
    )));

    let advisor: Option<Arc<dyn SignalAdvisor>> = match &config.scanner.advisor_url {
        Some(url) => {
            let advisor = HttpAdvisor::new(
                url.clone(),
                Duration::from_secs(config.scanner.advisor_timeout_secs),
            )?;
            Some(Arc::new(advisor) as Arc<dyn SignalAdvisor>)
        }
        None => {
            tracing::info!("no advisor configured, indicator fallback scoring only");
            None
        }
    };

    let (signal_tx, signal_rx) = mpsc::channel(64);
    let scanner = Scanner::new(
        config.scanner.clone(),
        Arc::clone(&market),
        advisor,
        Arc::clone(&advisor_breaker),
        positions.clone() as Arc<dyn PositionStore>,
        directory.clone() as Arc<dyn TraderDirectory>,
        Arc::clone(&debounce),
        signal_tx,
    );
    let scanner_handle = scanner.spawn();

    let pipeline = Arc::new(ExecutionPipeline::new(
        config.engine.clone(),
        config.scanner.signal_max_age_secs,
        manager,
        market,
        positions.clone() as Arc<dyn PositionStore>,
        directory.clone() as Arc<dyn TraderDirectory>,
        debounce,
    ));
    let engine_handle = EngineService::new(pipeline, signal_rx).spawn();

    let api = ApiServer::new(ApiState {
        engine: engine_handle.clone(),
        scanner: scanner_handle.clone(),
        breakers: vec![broker_breaker, advisor_breaker],
        positions: positions as Arc<dyn PositionStore>,
    });
    let addr = format!("{}:{}", config.server.host, config.server.port);

    tokio::select! {
        result = api.serve(&addr) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
            let _ = scanner_handle.shutdown().await;
            let _ = engine_handle.shutdown().await;
            Ok(())
        }
    }
}
