//! Start the ordering node.

use super::genesis::read_block;
use crate::config::{init_logging, LedgerType, NodeConfig};
use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use orderer_channelconfig::genesis;
use orderer_consensus::{solo, ConsenterRegistry};
use orderer_core::{create_signed_envelope, Block, HeaderType, Keypair, Signer};
use orderer_multichannel::Registrar;
use orderer_storage::{Factory, RamLedgerFactory, ReadWriter, SledLedgerFactory, Storage};
use std::fs;
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Args)]
pub struct StartArgs {
    /// Node config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

pub fn run(args: StartArgs) -> Result<()> {
    let config = NodeConfig::load(args.config.as_deref())?;
    init_logging(&config.log_level);

    let signer = load_signer(config.signer_key.as_deref())?;
    let (factory, storage) = open_factory(&config)?;
    bootstrap(factory.as_ref(), &config)?;

    let registrar = Registrar::new(Arc::clone(&factory), Arc::clone(&signer));
    registrar
        .initialize(consenters())
        .context("Failed to start channels")?;

    println!("{}", "Orderer started".bold().cyan());
    for channel_id in registrar.channel_ids() {
        let marker = if registrar.system_channel_id().as_deref() == Some(channel_id.as_str()) {
            " (system)".bright_black().to_string()
        } else {
            String::new()
        };
        println!("  {}{}", channel_id.bright_yellow(), marker);
    }
    println!();
    println!("Enter messages as '<channel> <text>', one per line. EOF stops the node.");

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let Some((channel_id, text)) = line.trim().split_once(' ') else {
            continue;
        };
        if let Err(e) = broadcast(&registrar, signer.as_ref(), channel_id, text) {
            println!("{}  {:#}", "✗".red().bold(), e);
        }
    }

    registrar.halt_all();
    if let Some(storage) = storage {
        storage.flush().context("Failed to flush ledger")?;
    }
    info!("orderer stopped");
    Ok(())
}

fn consenters() -> ConsenterRegistry {
    let mut consenters = ConsenterRegistry::new();
    consenters.insert(
        solo::CONSENSUS_TYPE.to_string(),
        Arc::new(solo::Consenter::new()),
    );
    consenters
}

fn load_signer(path: Option<&Path>) -> Result<Arc<dyn Signer>> {
    let Some(path) = path else {
        warn!("no signer key configured, using a fresh key");
        return Ok(Arc::new(Keypair::generate()));
    };
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read signer key: {}", path.display()))?;
    let bytes = hex::decode(contents.trim()).context("Signer key is not valid hex")?;
    let Ok(private_key) = <[u8; 32]>::try_from(bytes.as_slice()) else {
        bail!("Signer key must be 32 bytes, got {}", bytes.len());
    };
    Ok(Arc::new(Keypair::from_private_key(&private_key)))
}

fn open_factory(config: &NodeConfig) -> Result<(Arc<dyn Factory>, Option<Storage>)> {
    match config.ledger_type {
        LedgerType::Ram => {
            let factory: Arc<dyn Factory> =
                Arc::new(RamLedgerFactory::new(config.ram_ledger_max_size));
            Ok((factory, None))
        }
        LedgerType::Sled => {
            fs::create_dir_all(&config.data_dir).with_context(|| {
                format!("Failed to create data directory: {}", config.data_dir.display())
            })?;
            let storage = Storage::open(&config.data_dir).context("Failed to open storage")?;
            let factory: Arc<dyn Factory> = Arc::new(SledLedgerFactory::new(storage.clone()));
            Ok((factory, Some(storage)))
        }
    }
}

/// Write the genesis block when the ledger holds no channel yet.
fn bootstrap(factory: &dyn Factory, config: &NodeConfig) -> Result<()> {
    if !factory.channel_ids().is_empty() {
        return Ok(());
    }
    let block = match &config.genesis_block {
        Some(path) => read_block(path)?,
        None => {
            warn!(
                channel = %config.system_channel_id,
                "no genesis block configured, bootstrapping the sample system channel"
            );
            let profile = genesis::system_channel_config(solo::CONSENSUS_TYPE, vec![]);
            genesis::genesis_block(&config.system_channel_id, profile)?
        }
    };
    let channel_id = genesis_channel_id(&block)?;
    factory.get_or_create(&channel_id)?.append(block)?;
    info!(channel = %channel_id, "bootstrapped ledger from genesis block");
    Ok(())
}

fn genesis_channel_id(block: &Block) -> Result<String> {
    let Some(config_tx) = block.data.first() else {
        bail!("Genesis block holds no transaction");
    };
    Ok(config_tx.channel_header()?.channel_id)
}

fn broadcast(registrar: &Registrar, signer: &dyn Signer, channel_id: &str, text: &str) -> Result<()> {
    let envelope = create_signed_envelope(
        HeaderType::Message,
        channel_id,
        Some(signer),
        &text.to_string(),
        0,
        0,
    )?;
    let (_, is_config_update, chain) = registrar.broadcast_channel_support(&envelope)?;
    if is_config_update {
        bail!("Config updates cannot be entered here");
    }
    let config_seq = chain.process_normal_msg(&envelope)?;
    chain.order(envelope, config_seq)?;
    println!("{}  Queued message for {}", "✓".green().bold(), channel_id.bright_cyan());
    Ok(())
}
