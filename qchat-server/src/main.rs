//! `QChat` server -- HTTP front for the message confidentiality pipeline.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:8000 against an oracle on localhost:5000
//! cargo run --bin qchat-server
//!
//! # Custom address and oracle
//! cargo run --bin qchat-server -- --bind 127.0.0.1:8080 \
//!     --oracle-url http://oracle.internal:5000
//!
//! # Refuse to store unencrypted payloads when the oracle is down
//! cargo run --bin qchat-server -- --fallback reject
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use qchat_server::config::{QchatCliArgs, ServerConfig};
use qchat_server::server::{self, AppState};

#[tokio::main]
async fn main() {
    let cli = QchatCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&config.log_level, cli.log_file.as_deref());

    tracing::info!(
        addr = %config.bind_addr,
        oracle = %config.oracle_url,
        max_attempts = config.max_attempts,
        key_length = config.key_length,
        fallback = %config.fallback,
        "starting qchat server"
    );

    let state = match AppState::from_config(&config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            tracing::error!(error = %e, "failed to set up encryption oracle client");
            std::process::exit(1);
        }
    };

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "qchat server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "qchat server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start qchat server");
            std::process::exit(1);
        }
    }
}

/// Initialize logging to stderr and, if `file_path` is given, to that file.
///
/// Returns a [`WorkerGuard`] for the file writer that must be held until
/// shutdown so buffered entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = file_path
        .and_then(|path| Some((path.parent()?, path.file_name()?.to_str()?)))
        .map(|(dir, name)| {
            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter());
            (Some(layer), Some(guard))
        })
        .unwrap_or((None, None));

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter()))
        .with(file_layer)
        .init();

    guard
}
