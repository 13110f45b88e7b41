//! ospxy forward proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────┐
//!                      │                        OSPXY                         │
//!   Client Request     │  ┌─────────┐   ┌──────────┐   ┌───────────────────┐  │
//!  ────────────────────┼─▶│   net   │──▶│   http   │──▶│      forward      │──┼──▶ https://origin
//!   (plain HTTP)       │  │listener │   │ request  │   │ HTTPS, then HTTP  │──┼──▶ http://origin
//!                      │  └─────────┘   └──────────┘   └─────────┬─────────┘  │
//!   Client Response    │                ┌──────────┐             │            │
//!  ◀───────────────────┼────────────────│ response │◀────────────┘            │
//!                      │                │relay/503 │                          │
//!                      │                └──────────┘                          │
//!                      │   config · lifecycle · observability                 │
//!                      └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use ospxy::lifecycle::{self, StartupOptions};
use ospxy::observability::logging;

#[derive(Parser, Debug)]
#[command(name = "ospxy", version, about = "Plain HTTP to HTTPS forward proxy")]
struct Cli {
    /// Configuration file (default: conf/ospxy.json, then ./ospxy.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listening port, overriding httpPort
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address, overriding httpBindAddr
    #[arg(short, long)]
    bind: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    logging::init(cli.log_json);

    tracing::info!("ospxy v{} starting", env!("CARGO_PKG_VERSION"));

    lifecycle::run(StartupOptions {
        config_path: cli.config,
        base_dir: PathBuf::from("."),
        port: cli.port,
        bind: cli.bind,
    })
    .await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
