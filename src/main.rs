//! Lattice test environment
//!
//! Applies resources and runs scenarios against a bare Kubernetes API server.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use lattice_testenv::{Cli, Result};

#[tokio::main]
async fn main() -> Result<()> {
    // Install crypto provider before any kube client is built
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("Failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let cli = Cli::parse();
    cli.run().await
}
