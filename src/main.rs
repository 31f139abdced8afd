//! CLI entry point for the patch mosaic tool

use clap::Parser;
use patchmosaic::io::cli::Cli;
use tracing_subscriber::FmtSubscriber;

fn main() -> patchmosaic::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries envelope responses
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level())
        .with_writer(std::io::stderr)
        .finish();
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        tracing::warn!(error = %err, "tracing subscriber already installed");
    }

    cli.run()
}
