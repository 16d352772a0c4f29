//! Multi-room TCP chat server.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin server
//! cargo run --bin server -- --host 0.0.0.0 --port 9000
//! ```

use std::sync::Arc;

use clap::Parser;
use irori::{
    auth::{TokenStore, UserDirectory, tokens::DEFAULT_TOKEN_TTL_SECS},
    common::{logger::setup_logger, time::SystemClock},
    infrastructure::{CsvCredentialStore, CsvTokenRepository, HttpTextGenerator},
    server::{AppState, run_server},
};

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Multi-room chat server with reconnectable sessions and AI rooms", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// Path to the registered-users CSV file
    #[arg(long, default_value = "db/users.csv")]
    users_file: String,

    /// Path to the session-token CSV file
    #[arg(long, default_value = "db/tokens.csv")]
    tokens_file: String,

    /// Endpoint of the text-generation backend used by AI rooms
    #[arg(long, default_value = "http://127.0.0.1:8081/generate")]
    backend_url: String,

    /// Session token lifetime in seconds
    #[arg(long, default_value_t = DEFAULT_TOKEN_TTL_SECS)]
    token_ttl_secs: i64,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    // Initialize dependencies in order:
    // 1. Repositories (file-backed)
    // 2. Auth services (user directory, token store)
    // 3. Text-generation backend client
    // 4. AppState
    // 5. Server

    let credential_store = Arc::new(CsvCredentialStore::new(&args.users_file));
    let token_repository = Arc::new(CsvTokenRepository::new(&args.tokens_file));

    let users = UserDirectory::new(credential_store);
    match users.load().await {
        Ok(count) => tracing::info!("Loaded {} registered user(s)", count),
        Err(e) => {
            tracing::error!("Failed to load users: {}", e);
            std::process::exit(1);
        }
    }

    let tokens = TokenStore::new(token_repository, Arc::new(SystemClock), args.token_ttl_secs);
    match tokens.load().await {
        Ok(count) => tracing::info!("Loaded {} valid session token(s)", count),
        Err(e) => {
            tracing::error!("Failed to load tokens: {}", e);
            std::process::exit(1);
        }
    }

    let generator = Arc::new(HttpTextGenerator::new(args.backend_url));

    let state = Arc::new(AppState::new(users, tokens, generator));

    if let Err(e) = run_server(&args.host, args.port, state).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
