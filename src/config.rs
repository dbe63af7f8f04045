use clap::{Args, Parser, Subcommand};
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(name = "carimbai")]
#[command(about = "Loyalty stamp issuance and redemption")]
#[command(version)]
pub struct Config {
    /// Base URL of the stamp backend API
    #[arg(long, env = "API_BASE_URL", default_value = "http://127.0.0.1:8080/api", global = true)]
    pub api_base_url: String,

    /// Seconds to wait for any backend call
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value = "15", global = true)]
    pub request_timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

impl Config {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run the reference stamp backend
    Serve(ServerConfig),

    /// List a customer's loyalty cards
    Cards {
        #[arg(long)]
        customer_id: i64,
    },

    /// Display a fresh stamp code for the customer's card
    ShowQr {
        #[arg(long)]
        customer_id: i64,
    },

    /// Merchant console: every stdin line is a scanned code
    Scan,

    /// Redeem the reward of a full card
    Redeem {
        #[arg(long)]
        card_id: i64,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// SQLite database URL
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://carimbai.db")]
    pub database_url: String,

    /// Hex AES-128 key signing stamp tokens; random per process if unset
    #[arg(long, env = "TOKEN_SIGNING_KEY")]
    pub token_signing_key: Option<String>,

    /// Validity of an issued token in seconds
    #[arg(long, env = "TOKEN_TTL_SECS", default_value = "300")]
    pub token_ttl_secs: u64,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl_secs)
    }
}
