#![warn(missing_docs)]
//! `fq`: run filesystem commands through a bounded open-file queue.

use anyhow::Result;
use clap::Parser;
use filequeue::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    cli.run().await
}
