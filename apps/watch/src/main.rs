//! Ticker Watch - realtime price monitor
//!
//! Watches a set of symbols on a realtime price feed, logs every price
//! move, and reconnects with backoff when the feed drops.

mod config;

use clap::Parser;
use config::{split_symbols, AppConfig, ConfigError};
use std::path::PathBuf;
use std::time::Duration;
use ticker_feeds::{
    PriceChange, PriceSource, PriceWatch, RealtimeHandle, RealtimeView, ReconnectSupervisor,
};
use tokio::sync::broadcast;
use tracing::{error, info, warn, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Config file picked up from the working directory when `--config` is absent.
const DEFAULT_CONFIG_FILE: &str = "ticker.json";

/// Ticker Watch CLI
#[derive(Parser, Debug)]
#[command(name = "ticker-watch")]
#[command(about = "Realtime price feed monitor", long_about = None)]
struct Args {
    /// Configuration file path (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Realtime feed WebSocket URL
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Currency context, e.g. USD or TRY
    #[arg(short = 'C', long)]
    currency: Option<String>,

    /// Comma-separated symbols to watch
    #[arg(short, long)]
    symbols: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long)]
    log_level: Option<String>,
}

fn init_logging(level: &str) {
    let level = match level {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // RUST_LOG wins when set.
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }
}

fn load_config(args: &Args) -> Result<AppConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None if std::path::Path::new(DEFAULT_CONFIG_FILE).exists() => {
            AppConfig::load(std::path::Path::new(DEFAULT_CONFIG_FILE))?
        }
        None => AppConfig::default(),
    };
    config.apply_env();
    apply_args(&mut config, args);
    config.validate()?;
    Ok(config)
}

fn apply_args(config: &mut AppConfig, args: &Args) {
    if let Some(endpoint) = &args.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(currency) = &args.currency {
        config.currency = currency.clone();
    }
    if let Some(symbols) = &args.symbols {
        config.symbols = split_symbols(symbols);
    }
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
}

fn format_change(change: &PriceChange, timestamp_ms: Option<u64>) -> String {
    let time = timestamp_ms
        .and_then(|ms| i64::try_from(ms).ok())
        .and_then(chrono::DateTime::<chrono::Utc>::from_timestamp_millis)
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "--:--:--".to_string());
    format!(
        "{} {} {:.4} -> {:.4} @ {}",
        change.direction.arrow(),
        change.symbol,
        change.previous,
        change.current,
        time
    )
}

fn log_summary(watch: &PriceWatch, config: &AppConfig) {
    let view = watch.view();
    for symbol in &config.symbols {
        let fallback = config.fallback_prices.get(symbol).copied();
        match view.prices.resolve(symbol, fallback) {
            Some(resolved) if resolved.source == PriceSource::Live => {
                info!("  {} {:.4} {}", symbol, resolved.value, view_currency(&view))
            }
            Some(resolved) => info!(
                "  {} {:.4} {} (not live)",
                symbol,
                resolved.value,
                view_currency(&view)
            ),
            None => info!("  {} waiting for data", symbol),
        }
    }
}

fn view_currency(view: &RealtimeView) -> &str {
    view.currency.as_ref().map(|c| c.as_str()).unwrap_or("-")
}

async fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let handle = RealtimeHandle::spawn(config.feed_config())?;

    let mut supervisor =
        ReconnectSupervisor::new(handle.clone(), (&config.reconnect).into()).spawn();
    let watch = handle.watch(config.symbols.iter().cloned(), &config.currency)?;

    let mut changes = watch.changes();
    let period = Duration::from_secs(config.summary_interval_secs.max(1));
    let mut summary = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(change) => {
                    let timestamp = watch
                        .price(&change.symbol)
                        .and_then(|entry| entry.update.last_update_timestamp_ms);
                    info!("{}", format_change(&change, timestamp));
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Price log fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            exit = &mut supervisor => {
                match exit {
                    Ok(exit) => error!(?exit, "Reconnect supervisor stopped"),
                    Err(e) => error!("Reconnect supervisor failed: {}", e),
                }
                break;
            }
            _ = summary.tick(), if config.summary_interval_secs > 0 => {
                info!(connected = watch.is_connected(), "Price summary");
                log_summary(&watch, &config);
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                info!("Shutting down...");
                break;
            }
        }
    }

    supervisor.abort();
    drop(watch);
    // Let the hub send the final unsubscribe before the runtime stops.
    tokio::time::sleep(Duration::from_millis(200)).await;
    Ok(())
}

#[tokio::main]
async fn main() {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    init_logging(&config.log_level);

    info!("Ticker Watch starting...");
    info!("  Endpoint: {}", config.endpoint);
    info!("  Currency: {}", config.currency);
    info!("  Symbols: {}", config.symbols.join(", "));

    if let Err(e) = run(config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use ticker_core::PriceDirection;

    #[test]
    fn test_format_change() {
        let change = PriceChange {
            symbol: "AAPL-USD".to_string(),
            previous: 189.5,
            current: 190.25,
            direction: PriceDirection::Up,
        };
        assert_eq!(
            format_change(&change, Some(1_700_000_000_000)),
            format!("{} AAPL-USD 189.5000 -> 190.2500 @ 22:13:20", PriceDirection::Up.arrow())
        );
        assert!(format_change(&change, None).ends_with("@ --:--:--"));
    }

    #[test]
    fn test_args_override_config() {
        let args = Args::parse_from([
            "ticker-watch",
            "--endpoint",
            "wss://feed.example.com",
            "-C",
            "EUR",
            "--symbols",
            "AAPL-EUR,SAP-EUR",
        ]);
        let mut config = AppConfig::default();
        apply_args(&mut config, &args);

        assert_eq!(config.endpoint, "wss://feed.example.com");
        assert_eq!(config.currency, "EUR");
        assert_eq!(
            config.symbols,
            vec!["AAPL-EUR".to_string(), "SAP-EUR".to_string()]
        );
        assert_eq!(config.log_level, "info");
    }
}
