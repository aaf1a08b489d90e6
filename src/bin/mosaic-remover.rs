//! Mosaic remover command-line entry point

use mosaic_remover::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
