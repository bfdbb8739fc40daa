//! # ecobites-server
//!
//! Real-time chat backend for the Ecobites donation platform.
//!
//! This binary provides:
//! - **REST API** (axum) to open donor / requester threads, send and list
//!   messages, and list a user's inbox
//! - **WebSocket push** of new messages to the other participant when they
//!   are online
//! - **Directory API** so the donation side can publish usernames and item
//!   summaries shown in thread listings
//! - **AI suggestions** backed by Gemini, with built-in defaults
//!
//! `ecobites-server issue-token <userId>` prints a bearer token for a user
//! and exits.

mod api;
mod auth;
mod chat;
mod config;
mod error;
mod presence;
mod router;
mod suggestions;
mod ws;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ecobites_shared::constants::APP_NAME;
use ecobites_shared::UserId;
use ecobites_store::Database;

use crate::api::AppState;
use crate::auth::TokenVerifier;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ecobites_server=debug")),
        )
        .init();

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if let [command, user] = args.as_slice() {
        if command == "issue-token" {
            let user = UserId::parse("userId", user)?;
            let tokens = TokenVerifier::new(config.auth_secret.as_bytes())?;
            println!("{}", tokens.issue(&user));
            return Ok(());
        }
    }
    if !args.is_empty() {
        anyhow::bail!("usage: ecobites-server [issue-token <userId>]");
    }

    info!("Starting {} chat server v{}", APP_NAME, env!("CARGO_PKG_VERSION"));
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open the store and build application state
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path).with_context(|| {
        format!("failed to open database at {}", config.database_path.display())
    })?;
    info!(path = %config.database_path.display(), "Database ready");

    let http_addr = config.http_addr;
    let app_state = AppState::new(db, config)?;
    let presence = app_state.presence.clone();

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    presence.clear();
    Ok(())
}
