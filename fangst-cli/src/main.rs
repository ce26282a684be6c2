//! ## fangst-cli
//! Fangst main entrypoint: the traffic capture platform (intercepting
//! proxy, raw capture, segment monitor) and CA certificate management
//! for client installation.

use clap::Parser;

mod commands;

use commands::Cli;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    commands::run_command(cli)
}
