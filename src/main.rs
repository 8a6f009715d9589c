//! Instagram MCP Server - Entry Point
//!
//! Serves MCP over stdio. Logs go to stderr as JSON because stdout carries
//! the protocol.

use instagram_mcp::{
    BrowserPostExtractor, BrowserSessionProvider, Config, InstagramService, McpServer,
    PaginationEngine, ToolRegistry,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("Instagram MCP Server v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: instagram-mcp");
        println!();
        println!("Serves the get_instagram_posts tool over MCP (stdio).");
        println!("Start Chrome with --remote-debugging-port=9222 and log in to Instagram first.");
        println!();
        println!("Environment variables:");
        println!("  CHROME_DEBUG_URL              DevTools endpoint (default: http://127.0.0.1:9222)");
        println!("  INSTAGRAM_ROUND_DELAY_MS      Pause between batches in \"all\" mode (default: 1500)");
        println!("  INSTAGRAM_KEEPALIVE_SECS      Keep-alive progress interval, 0 disables (default: 10)");
        println!("  INSTAGRAM_ROUND_TIMEOUT_SECS  Timeout for one batch (default: 90)");
        println!("  INSTAGRAM_PROBE_HAS_MORE      Probe next offset for hasMore (default: false)");
        println!("  INSTAGRAM_MAX_SCROLLS         Scroll attempts per batch (default: 25)");
        println!("  INSTAGRAM_SETTLE_MS           Wait after navigation/scroll (default: 1200)");
        println!("  MCP_SHUTDOWN_GRACE_SECS       Wait for running calls on exit (default: 5)");
        println!("  RUST_LOG                      trace|debug|info|warn|error (default: info)");
        return Ok(());
    }

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    // MCP mode - log to stderr as JSON
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .json()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Instagram MCP Server v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    info!(browser_url = %config.browser_url, probe_has_more = config.probe_has_more, "Configuration loaded");

    let provider = BrowserSessionProvider::new(config.session())?;
    let extractor = BrowserPostExtractor::new(config.extractor());
    let service = InstagramService::new(provider, extractor, PaginationEngine::new(config.engine()));

    let server = McpServer::new(ToolRegistry::new(Arc::new(service)), config.shutdown_grace);

    let shutdown = server.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.cancel();
    });

    server.run().await?;

    info!("Exiting");
    // The blocking stdin reader thread cannot be interrupted; don't wait for it
    std::process::exit(0)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
