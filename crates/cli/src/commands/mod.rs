//! CLI commands module.

use anyhow::Result;
use clap::Subcommand;

mod channels;
mod genesis;
mod start;

#[derive(Subcommand)]
pub enum Commands {
    /// Start the node and order messages read from stdin
    Start(start::StartArgs),
    /// Write a system channel genesis block
    Genesis(genesis::GenesisArgs),
    /// List the channels in a sled ledger
    Channels(channels::ChannelsArgs),
}

pub fn run(cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Start(args) => start::run(args),
        Commands::Genesis(args) => genesis::run(args),
        Commands::Channels(args) => channels::run(args),
    }
}
