#![allow(dead_code)]

use orderer_channelconfig::genesis;
use orderer_consensus::{solo, ConsenterRegistry};
use orderer_core::{create_signed_envelope, Block, Envelope, HeaderType, Keypair, Signer};
use orderer_storage::{Factory, RamLedgerFactory, ReadWriter, Reader, SeekPosition};
use std::sync::Arc;
use std::time::Duration;

pub const SYSTEM_CHANNEL: &str = "system-channel";

pub const WAIT: Duration = Duration::from_secs(5);

pub fn system_genesis(channel_id: &str) -> Block {
    let config = genesis::system_channel_config(solo::CONSENSUS_TYPE, vec![]);
    genesis::genesis_block(channel_id, config).unwrap()
}

pub fn application_genesis(channel_id: &str) -> Block {
    let config = genesis::application_channel_config(solo::CONSENSUS_TYPE, vec![]);
    genesis::genesis_block(channel_id, config).unwrap()
}

/// A RAM ledger factory with one ledger per genesis block.
pub fn ram_factory(ledgers: Vec<(&str, Block)>) -> Arc<RamLedgerFactory> {
    let factory = Arc::new(RamLedgerFactory::new(100));
    for (channel_id, block) in ledgers {
        factory
            .get_or_create(channel_id)
            .unwrap()
            .append(block)
            .unwrap();
    }
    factory
}

pub fn consenters() -> ConsenterRegistry {
    let mut consenters = ConsenterRegistry::new();
    consenters.insert(
        solo::CONSENSUS_TYPE.to_string(),
        Arc::new(solo::Consenter::new()),
    );
    consenters
}

pub fn signer() -> Arc<dyn Signer> {
    Arc::new(Keypair::generate())
}

pub fn normal_tx(channel_id: &str, n: u64) -> Envelope {
    create_signed_envelope(HeaderType::Message, channel_id, None, &n, 0, 0).unwrap()
}

pub fn tx_values(block: &Block) -> Vec<u64> {
    block
        .data
        .iter()
        .map(|env| env.decode_data_of(HeaderType::Message).unwrap())
        .collect()
}

/// Wait for block `number` to be committed.
pub fn wait_for_block<R: Reader + ?Sized>(ledger: &R, number: u64) -> Block {
    ledger
        .iterator(SeekPosition::Specified(number))
        .unwrap()
        .next_timeout(WAIT)
        .unwrap()
        .unwrap_or_else(|| panic!("block {} was not committed in time", number))
}
