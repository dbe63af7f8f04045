mod app_state;
mod backend;
mod card;
mod commands;
mod config;
mod crypto;
mod db;
mod error;
mod flow;
mod handlers;
mod history;
mod scan;
mod session;
mod stamp;
mod token;
mod validation;

use clap::Parser;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use app_state::AppState;
use config::{Command, Config, ServerConfig};
use crypto::AesKey;
use db::init_pool;
use validation::CmacSigner;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "carimbai=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parse configuration
    let config = Config::parse();

    match &config.command {
        Command::Serve(server) => serve(server).await,
        Command::Cards { customer_id } => commands::cards(&config, *customer_id).await,
        Command::ShowQr { customer_id } => commands::show_qr(&config, *customer_id).await,
        Command::Scan => commands::scan(&config).await,
        Command::Redeem { card_id } => commands::redeem(&config, *card_id).await,
    }
}

async fn serve(config: &ServerConfig) -> anyhow::Result<()> {
    // Initialize database
    let pool = init_pool(&config.database_url).await?;

    let key = match &config.token_signing_key {
        Some(hex) => AesKey::from_hex(hex)?,
        None => {
            tracing::warn!("TOKEN_SIGNING_KEY not set, issued codes will not survive a restart");
            AesKey::generate()
        }
    };

    // Create shared state
    let state = AppState {
        pool,
        signer: CmacSigner::new(key),
        token_ttl: config.token_ttl(),
    };

    let app = handlers::router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.socket_addr()).await?;

    tracing::info!("Server running on {}", config.socket_addr());
    tracing::info!("Token validity: {}s", config.token_ttl_secs);

    axum::serve(listener, app).await?;

    Ok(())
}
