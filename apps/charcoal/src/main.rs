//! # Charcoal - model pipeline CLI
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │            apps/charcoal (THE BINARY)         │
//! │                                               │
//! │   ┌──────────────┐      ┌─────────────────┐   │
//! │   │  CLI (clap)  │ ───> │  charcoal.toml  │   │
//! │   └──────┬───────┘      └─────────────────┘   │
//! │          ▼                                    │
//! │   ┌───────────────┐                           │
//! │   │ charcoal-core │                           │
//! │   │  (THE LOGIC)  │                           │
//! │   └───────────────┘                           │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! charcoal describe cms/news
//! charcoal migrate cms/news cms/event
//! charcoal import cms/news -f news.json
//! charcoal list cms/news --filter active=true --order date --desc --page 2
//! charcoal cache clear
//! ```

use charcoal::cli;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

fn main() {
    let cli = cli::Cli::parse();

    // CHARCOAL_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("CHARCOAL_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let default_filter = if cli.verbose {
        "charcoal=debug,charcoal_core=debug"
    } else {
        "charcoal=info,charcoal_core=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }

    if let Err(e) = cli::execute(cli) {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}
