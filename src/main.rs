//! sitehost: a multi-tenant content server.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────────────────┐
//!                      │                        SITEHOST                          │
//!   HTTPS :8443        │  ┌──────────┐   ┌────────────┐   ┌──────────────────┐    │
//!   ───────────────────┼─▶│ tls SNI  │──▶│ middleware │──▶│ routing::host    │    │
//!                      │  │ resolver │   │   chain    │   │ Host → tenant    │    │
//!                      │  └────┬─────┘   └────────────┘   └────────┬─────────┘    │
//!                      │       │ ACME                              ▼              │
//!                      │       ▼                           ┌──────────────────┐   │
//!   HTTP :8080         │  ┌──────────┐                     │ routing::router  │   │
//!   ───────────────────┼─▶│ redirect │                     │ path → page      │   │
//!     challenge / 301  │  └──────────┘                     └────────┬─────────┘   │
//!                      │                                            ▼             │
//!                      │  ┌───────────┐   api(...)        ┌──────────────────┐    │
//!                      │  │ api       │◀──────────────────│ render (blocking │    │
//!                      │  │ dispatcher│──▶ app (in-proc)  │ pool)            │    │
//!                      │  │ + cache   │                   └────────┬─────────┘    │
//!                      │  └───────────┘                            ▼              │
//!                      │  ┌──────────────────────────────────────────────────┐    │
//!                      │  │ sandbox (path validator) · db (sqlite cache)      │    │
//!                      │  │ tenant (catalog, logger) · observability         │    │
//!                      │  └──────────────────────────────────────────────────┘    │
//!                      └──────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use sitehost::config::{load_config, Environment, ServerConfig};
use sitehost::lifecycle::startup::{apply_overrides, init_observability, Overrides};
use sitehost::Server;

#[derive(Debug, Parser)]
#[command(name = "sitehost", version, about = "Multi-tenant content server")]
struct Args {
    /// Server configuration file.
    #[arg(short, long, default_value = "sitehost.toml")]
    config: PathBuf,

    /// Deployment environment: local, staging or production.
    #[arg(short, long)]
    env: Option<Environment>,

    /// Project root; overrides `server.project_root`.
    #[arg(short, long)]
    root: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = if args.config.exists() {
        load_config(&args.config)?
    } else {
        ServerConfig::default()
    };
    let config = apply_overrides(
        config,
        &Overrides {
            environment: args.env,
            project_root: args.root,
        },
    )?;

    init_observability(&config);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        environment = config.server.environment.as_str(),
        root = %config.server.project_root.display(),
        "sitehost starting"
    );

    let server = Server::new(config)?;
    server.run().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
