use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tollgate::config::GatewayConfig;
use tollgate::gateway::Gateway;
use tollgate::operations::standard_registry;
use tollgate::sqlite_store::SqliteStore;
use tollgate::store::{MemoryStore, Store};
use tollgate::upstream::OpenAiCompatibleUpstream;

#[derive(Parser)]
#[command(name = "tollgate-server", version, about = "Credit-metered AI gateway")]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server.
    Serve {
        /// Override the configured listen address.
        #[arg(long)]
        listen: Option<String>,
    },
    /// Create an account (idempotent) and print its API key.
    Provision { account_id: String },
    /// Replace an account's API key and print the new one.
    RotateKey { account_id: String },
    /// Add credits to an account outside the payment flow.
    Grant { account_id: String, credits: u32 },
}

fn load_config(path: Option<&PathBuf>) -> Result<GatewayConfig, tollgate::GatewayError> {
    match path {
        Some(path) => GatewayConfig::load(path),
        None => {
            let mut config = GatewayConfig::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }
}

fn build_gateway(config: GatewayConfig) -> Result<Gateway, tollgate::GatewayError> {
    let store: Arc<dyn Store> = match &config.sqlite_path {
        Some(path) => Arc::new(SqliteStore::new(path.clone())),
        None => {
            tracing::warn!("no sqlite_path configured; using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };
    let upstream = Arc::new(OpenAiCompatibleUpstream::new(&config.upstream));
    let registry = standard_registry(upstream, &config.upstream);
    Ok(Gateway::new(config, store, registry))
}

fn init_tracing(json_logs: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;
    init_tracing(config.json_logs);

    match cli.command {
        Command::Serve { listen } => {
            if let Some(listen) = listen {
                config.listen = listen;
            }
            let listen = config.listen.clone();
            let gateway = Arc::new(build_gateway(config)?);

            // Expired rate windows are reclaimed in the background.
            let sweeper = Arc::clone(&gateway);
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                loop {
                    interval.tick().await;
                    sweeper.sweep_rate_windows();
                }
            });

            let app = tollgate::http::router(gateway);
            let listener = tokio::net::TcpListener::bind(&listen).await?;
            tracing::info!(%listen, "tollgate listening");
            axum::serve(listener, app).await?;
        }
        Command::Provision { account_id } => {
            let gateway = build_gateway(config)?;
            let account = gateway.resolver().provision(&account_id).await?;
            println!("account: {}", account.id);
            println!("api key: {}", account.api_key);
            println!("credits: {}", account.credits_balance);
        }
        Command::RotateKey { account_id } => {
            let gateway = build_gateway(config)?;
            let new_key = gateway.resolver().rotate_key(&account_id).await?;
            println!("new api key: {new_key}");
        }
        Command::Grant {
            account_id,
            credits,
        } => {
            let gateway = build_gateway(config)?;
            let now = gateway.clock().now_epoch_millis();
            let balance = gateway.ledger().credit(&account_id, credits, now).await?;
            println!("new balance: {balance}");
        }
    }
    Ok(())
}
