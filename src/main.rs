//! Shim binary that calls into the `hostwatch_monitor` library's `inner_main`.
use clap::Parser as _;
use eyre::Result;

use hostwatch_monitor::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    // Delegate to library entrypoint
    hostwatch_monitor::inner_main(Cli::parse()).await
}
