use std::io;

use eyre::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init()?;
    vitobridge::cli::run().await
}

fn init() -> Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vitobridge=info")),
        )
        .with_writer(io::stderr)
        .init();

    Ok(())
}
