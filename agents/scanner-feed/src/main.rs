//! Scanner Feed CLI Entry Point
//!
//! This is the main entry point for the scanner-feed binary.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scanner_feed::cli::config::{Config, LoggingConfig};
use scanner_feed::connection::protocol::{events, Exchange};
use scanner_feed::feed::ticks::{record_ticks, MarketTick};
use scanner_feed::feed::window::SharedWindow;
use scanner_feed::ConnectionController;

#[derive(Parser)]
#[command(name = "scanner-feed")]
#[command(author, version, about = "Scanner Feed - Resilient market-data streaming client")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "SCANNER_FEED_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Feed server URL, overrides the configuration
    #[arg(short, long, env = "SCANNER_FEED_URL", global = true)]
    url: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream ticks and print the latest window
    Watch {
        /// Exchange to subscribe to
        #[arg(short, long, value_enum)]
        exchange: Option<Exchange>,

        /// Ticker to subscribe to (repeatable)
        #[arg(short, long = "ticker")]
        tickers: Vec<String>,
    },
    /// Send a single envelope and print the replies
    Send {
        /// Event name
        #[arg(short, long)]
        event: String,

        /// JSON payload
        #[arg(short, long, default_value = "{}")]
        payload: String,

        /// How long to keep printing replies
        #[arg(short, long, default_value_t = 5)]
        wait_secs: u64,
    },
    /// Print the effective configuration as TOML
    Config,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default_config(),
    };
    if let Some(url) = &cli.url {
        config.connection.url = url.clone();
    }

    init_tracing(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Watch { exchange, tickers } => {
            if let Some(exchange) = exchange {
                config.subscription.exchange = exchange;
            }
            if !tickers.is_empty() {
                config.subscription.tickers = tickers;
            }
            watch(&config).await?;
        }
        Commands::Send {
            event,
            payload,
            wait_secs,
        } => {
            send(&config, &event, &payload, Duration::from_secs(wait_secs)).await?;
        }
        Commands::Config => {
            println!("{}", config.to_toml()?);
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    // Logs go to stderr so the rendered window stays readable on stdout
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let result = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        "compact" => builder.compact().try_init(),
        _ => builder.pretty().try_init(),
    };

    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

async fn watch(config: &Config) -> Result<()> {
    config.validate().context("Invalid configuration")?;

    let mut controller = config
        .controller_builder()
        .build()
        .context("Failed to create feed controller")?;

    let window = SharedWindow::new(config.stream_capacity());
    record_ticks(&mut controller, window.clone());

    controller.add_listener(events::STATUS, |payload| {
        info!(status = %payload, "Feed server status");
        Ok(())
    });
    controller.add_listener(events::ERROR, |payload| {
        warn!(error = %payload, "Feed server reported an error");
        Ok(())
    });

    let subscribe = config.subscribe_request().into_envelope()?;
    controller.send_on_open(subscribe.event(), subscribe.payload())?;

    info!(
        url = %controller.url(),
        exchange = %config.subscription.exchange,
        tickers = ?config.subscription.tickers,
        "Watching feed"
    );

    let renderer = tokio::spawn(render_window(window.clone()));

    controller.connect();
    controller.run_until(tokio::signal::ctrl_c()).await;
    renderer.abort();

    print_diagnostics(&controller);

    Ok(())
}

async fn send(config: &Config, event: &str, payload: &str, wait: Duration) -> Result<()> {
    let payload: Value = serde_json::from_str(payload).context("Payload is not valid JSON")?;
    config.validate().context("Invalid configuration")?;

    let mut controller = config
        .controller_builder()
        .build()
        .context("Failed to create feed controller")?;

    let mut replies = vec![events::UPDATE, events::STATUS, events::ERROR, events::UNSUBSCRIBED];
    if !replies.contains(&event) {
        replies.push(event);
    }
    for name in replies {
        let name = name.to_string();
        let label = name.clone();
        controller.add_listener(name, move |payload| {
            println!("{} {}", format!("[{}]", label).cyan().bold(), payload);
            Ok(())
        });
    }

    controller.connect();

    let timeout = Duration::from_secs(config.connection.connect_timeout_secs);
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    while !controller.is_open() {
        tokio::select! {
            _ = &mut deadline => {
                controller.disconnect();
                bail!("Could not connect to {} within {:?}", controller.url(), timeout);
            }
            event = controller.next_event() => controller.handle_event(event),
        }
    }

    controller
        .send(event, &payload)
        .with_context(|| format!("Failed to send '{}'", event))?;
    println!("{} {} {}", "→".green(), event.bold(), payload);

    controller.run_until(tokio::time::sleep(wait)).await;

    Ok(())
}

async fn render_window(window: SharedWindow<MarketTick>) {
    let mut changes = window.changes();
    while changes.changed().await.is_ok() {
        print_window(&window.snapshot());
    }
}

fn print_window(ticks: &[MarketTick]) {
    println!();
    println!("{}", "─".repeat(78));
    println!(
        "  {:<10} {:<8} {:<4} {:>12} {:>12} {:>12} {:>12}",
        "TICKER".dimmed(),
        "EXCHANGE".dimmed(),
        "TYPE".dimmed(),
        "BID".dimmed(),
        "ASK".dimmed(),
        "LAST".dimmed(),
        "TIME".dimmed(),
    );
    println!("{}", "─".repeat(78));

    for tick in ticks {
        let kind = match tick.tick_type.as_str() {
            "T" => tick.tick_type.green(),
            "Q" => tick.tick_type.cyan(),
            "B" => tick.tick_type.yellow(),
            _ => tick.tick_type.dimmed(),
        };

        let time = tick
            .time()
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());

        println!(
            "  {:<10} {:<8} {:<4} {:>12} {:>12} {:>12} {:>12}",
            tick.ticker.to_uppercase().bold(),
            tick.exchange,
            kind,
            format_price(tick.bid_price),
            format_price(tick.ask_price),
            format_price(tick.last_price),
            time.dimmed(),
        );
    }
}

fn format_price(price: Option<f64>) -> String {
    price
        .map(|p| format!("{:.4}", p))
        .unwrap_or_else(|| "-".to_string())
}

fn print_diagnostics(controller: &ConnectionController) {
    let diagnostics = controller.diagnostics();

    println!();
    println!("{}", "Session".bold());
    println!("  State:              {}", controller.state());
    println!("  Parse errors:       {}", diagnostics.parse_errors());
    println!("  Transport errors:   {}", diagnostics.transport_errors());
    println!("  Dropped sends:      {}", diagnostics.dropped_sends());
    println!("  Listener failures:  {}", diagnostics.listener_failures());

    if let Some(last) = diagnostics.last() {
        println!(
            "  Last issue:         {} {}",
            format!("[{}]", last.kind).yellow(),
            last.message.dimmed()
        );
    }
}

fn show_version() {
    println!("scanner-feed {}", env!("CARGO_PKG_VERSION"));
    println!("Streaming client for the market scanner feed server");
    println!();
    println!("Features:");
    println!("  - Event-multiplexed JSON envelopes over WebSocket");
    println!("  - Automatic reconnection with optional backoff");
    println!("  - Subscription replay on every reconnect");
    println!("  - Bounded tick window rendering");
}
