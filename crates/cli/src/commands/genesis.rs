//! Write a system channel genesis block.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use orderer_channelconfig::genesis;
use orderer_consensus::solo;
use orderer_core::{Block, PublicKey};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct GenesisArgs {
    /// Id of the system channel
    #[arg(short, long, default_value = "system-channel")]
    channel_id: String,

    /// Consensus type of the system channel
    #[arg(long, default_value = solo::CONSENSUS_TYPE)]
    consensus_type: String,

    /// Hex-encoded admin public key (repeatable). Without admins any config
    /// update is accepted.
    #[arg(short, long = "admin")]
    admins: Vec<String>,

    /// Maximum number of channels, 0 for no limit
    #[arg(long, default_value = "0")]
    max_channels: u64,

    /// Output file
    #[arg(short, long, default_value = "genesis.block")]
    output: PathBuf,
}

pub fn run(args: GenesisArgs) -> Result<()> {
    let admins = args
        .admins
        .iter()
        .map(|admin| parse_public_key(admin))
        .collect::<Result<Vec<_>>>()?;

    let mut config = genesis::system_channel_config(&args.consensus_type, admins);
    if let Some(orderer) = config.orderer.as_mut() {
        orderer.max_channels = args.max_channels;
    }
    let block = genesis::genesis_block(&args.channel_id, config)
        .context("Failed to build genesis block")?;
    write_block(&block, &args.output)?;

    println!("{}  Wrote genesis block", "✓".green().bold());
    println!("    Channel: {}", args.channel_id.bright_cyan());
    println!("    Hash: {}", block.hash().to_hex().bright_yellow());
    println!("    File: {}", args.output.display().to_string().bright_black());
    Ok(())
}

fn parse_public_key(hex_key: &str) -> Result<PublicKey> {
    let bytes = hex::decode(hex_key).with_context(|| format!("Invalid hex key: {}", hex_key))?;
    PublicKey::from_bytes(&bytes).with_context(|| format!("Invalid public key: {}", hex_key))
}

pub fn write_block(block: &Block, path: &Path) -> Result<()> {
    let bytes = bincode::serialize(block)?;
    fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

pub fn read_block(path: &Path) -> Result<Block> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    bincode::deserialize(&bytes).with_context(|| format!("Invalid block file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderer_channelconfig::Bundle;
    use orderer_core::Keypair;

    #[test]
    fn test_genesis_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("genesis.block");
        let admin = Keypair::generate();

        run(GenesisArgs {
            channel_id: "sys".into(),
            consensus_type: solo::CONSENSUS_TYPE.into(),
            admins: vec![hex::encode(admin.public_key.as_bytes())],
            max_channels: 3,
            output: output.clone(),
        })
        .unwrap();

        let block = read_block(&output).unwrap();
        assert_eq!(block.number(), 0);
        let bundle = Bundle::from_config_tx(&block.data[0]).unwrap();
        assert_eq!(bundle.channel_id(), "sys");
        assert!(bundle.is_system_channel());
        assert_eq!(bundle.orderer_config().unwrap().max_channels, 3);
    }

    #[test]
    fn test_rejects_bad_admin_key() {
        assert!(parse_public_key("not hex").is_err());
        assert!(parse_public_key("abcd").is_err());
    }
}
