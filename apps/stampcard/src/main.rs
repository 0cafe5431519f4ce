//! # Stamp Card Server
//!
//! The main binary for the school festival stamp card.
//!
//! This application provides:
//! - HTTP REST API server (axum-based)
//! - CLI interface for ledger administration
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │            apps/stampcard (THE BINARY)        │
//! │                                              │
//! │  ┌─────────────┐        ┌─────────────────┐  │
//! │  │   CLI       │        │   HTTP API      │  │
//! │  │  (clap)     │        │ (axum + JWT)    │  │
//! │  └──────┬──────┘        └────────┬────────┘  │
//! │         └───────────┬────────────┘           │
//! │                     ▼                        │
//! │            ┌─────────────────┐               │
//! │            │ stampcard-core  │               │
//! │            │  (THE LEDGER)   │               │
//! │            └─────────────────┘               │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! STAMPCARD_SESSION_SECRET=... STAMPCARD_IDENTITY_SECRET=... stampcard server
//!
//! # CLI operations
//! stampcard status
//! stampcard set-role -e teacher@jeohyeon.hs.kr -r admin
//! stampcard grant -t student@jeohyeon.hs.kr --auto
//! stampcard backup -o festival.stmp
//! ```

use clap::Parser;
use stampcard::cli;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // STAMPCARD_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("STAMPCARD_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stampcard=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    let cli = cli::Cli::parse();

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn print_banner() {
    println!(
        r#"
  ┌─┬─┬─┬─┬─┬─┬─┬─┐
  │★│★│★│ │ │ │ │ │   Festival Stamp Card v{}
  └─┴─┴─┴─┴─┴─┴─┴─┘
"#,
        env!("CARGO_PKG_VERSION")
    );
}
