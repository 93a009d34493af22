//! File Gateway
//!
//! HTTP front end for bucket-scoped object storage.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http server ──▶ route instrumentation ──▶ handler
//!                      (request id,     (pipeline invocation,       │
//!                       timeout,         correlation scope)         ▼
//!                       body limit)                        ObjectStorageAdapter
//!                                                          (pipeline invocation)
//!                                                                   │
//!                                                                   ▼
//!                                                        ObjectStore backend
//!                                                        (memory | filesystem)
//!
//!     Cross-cutting: config · logging · metrics · spans · lifecycle
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use file_gateway::config::{load_config, GatewayConfig};
use file_gateway::lifecycle::startup;

#[derive(Parser)]
#[command(name = "file-gateway")]
#[command(about = "Instrumented HTTP gateway for bucket-scoped file storage", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file. Defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => match load_config(&path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => GatewayConfig::default(),
    };

    match startup::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("file-gateway: {}", e);
            ExitCode::FAILURE
        }
    }
}
