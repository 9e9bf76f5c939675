//! dirserve binary entry point

use clap::Parser;
use serve_cli::logging::init_logging;
use serve_cli::{run, shutdown_signal, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args.logging_config())?;

    if let Err(e) = run(args, shutdown_signal()).await {
        tracing::error!("{:#}", e);
        return Err(e);
    }

    Ok(())
}
