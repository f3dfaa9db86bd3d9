//! List the channels stored in a sled ledger.

use crate::config::{LedgerType, NodeConfig};
use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use orderer_channelconfig::Bundle;
use orderer_multichannel::locator;
use orderer_storage::{Reader, SledLedger, Storage};
use std::path::PathBuf;

#[derive(Args)]
pub struct ChannelsArgs {
    /// Node config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// What one channel's ledger says about it.
struct ChannelSummary {
    channel_id: String,
    height: u64,
    sequence: u64,
    consensus_type: String,
    is_system: bool,
}

pub fn run(args: ChannelsArgs) -> Result<()> {
    let config = NodeConfig::load(args.config.as_deref())?;
    if config.ledger_type != LedgerType::Sled {
        bail!("Only the sled ledger keeps channels between runs");
    }

    let storage = Storage::open(&config.data_dir).with_context(|| {
        format!(
            "Failed to open storage at {}. Did you run 'orderer start'?",
            config.data_dir.display()
        )
    })?;
    let summaries = summarize(&storage)?;

    println!();
    println!("{}", "Channels:".bold().cyan());
    println!();
    if summaries.is_empty() {
        println!("  {}", "(none)".bright_black());
    }
    for summary in summaries {
        let name = if summary.is_system {
            format!("{} (system)", summary.channel_id)
        } else {
            summary.channel_id.clone()
        };
        println!(
            "  {} {} {} {}",
            name.bright_yellow(),
            format!("height {}", summary.height).bright_black(),
            format!("config seq {}", summary.sequence).bright_black(),
            summary.consensus_type.bright_cyan()
        );
    }
    println!();
    Ok(())
}

fn summarize(storage: &Storage) -> Result<Vec<ChannelSummary>> {
    let mut channel_ids = storage.channel_ids();
    channel_ids.sort();

    let mut summaries = Vec::with_capacity(channel_ids.len());
    for channel_id in channel_ids {
        let ledger = SledLedger::open(storage.channel_tree(&channel_id)?)?;
        let config_tx = locator::config_tx(&ledger)
            .with_context(|| format!("Channel {} has no usable config", channel_id))?;
        let bundle = Bundle::from_config_tx(&config_tx)?;
        summaries.push(ChannelSummary {
            height: ledger.height(),
            sequence: bundle.sequence(),
            consensus_type: bundle
                .orderer_config()
                .map(|orderer| orderer.consensus_type.clone())
                .unwrap_or_default(),
            is_system: bundle.is_system_channel(),
            channel_id,
        });
    }
    Ok(summaries)
}
