use std::sync::Arc;

use clap::Parser;
use copilot_core::CopilotConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use copilot_server::context::{connect_store, AppContext};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "copilot.toml")]
    config: String,

    /// Check the record store and exit
    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // OPENAI_API_KEY and COPILOT__* overrides may live in .env during development
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match CopilotConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.service.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    if args.health {
        let store = match connect_store(&config).await {
            Ok(s) => s,
            Err(e) => {
                println!("❌ Store connection failed: {}", e);
                std::process::exit(1);
            }
        };
        match store.health().await {
            Ok(v) => println!("✅ {} store connected: {}", store.name(), v),
            Err(e) => {
                println!("❌ {} store health check failed: {}", store.name(), e);
                std::process::exit(1);
            }
        }
        println!("✅ Copilot health check passed");
        return Ok(());
    }

    let ctx = match AppContext::from_config(&config).await {
        Ok(c) => Arc::new(c),
        Err(e) => {
            eprintln!("Failed to start copilot: {}", e);
            std::process::exit(1);
        }
    };

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    copilot_server::http::start_http_server(ctx, &config, tx.subscribe()).await?;

    Ok(())
}
