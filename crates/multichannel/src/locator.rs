//! Finds the latest config transaction committed to a ledger.

use crate::error::FatalError;
use orderer_core::{Envelope, HeaderType};
use orderer_storage::Reader;

/// Follow the last-config pointer of the newest block to the config
/// transaction it names.
///
/// Every failure means the ledger does not hold what this node committed, so
/// all of them are fatal.
pub fn config_tx<R: Reader + ?Sized>(ledger: &R) -> Result<Envelope, FatalError> {
    let height = ledger.height();
    let newest = height
        .checked_sub(1)
        .ok_or_else(|| FatalError::CorruptLedger("ledger is empty".into()))?;
    let last_block = ledger
        .block(newest)?
        .ok_or_else(|| FatalError::CorruptLedger(format!("newest block {} is missing", newest)))?;

    let index = last_block.last_config_index().map_err(|err| {
        FatalError::CorruptLedger(format!(
            "block {} has no usable last config pointer: {}",
            newest, err
        ))
    })?;
    if index >= height {
        return Err(FatalError::CorruptLedger(format!(
            "last config index {} is beyond ledger height {}",
            index, height
        )));
    }

    let config_block = ledger.block(index)?.ok_or_else(|| {
        FatalError::CorruptLedger(format!("config block {} is missing", index))
    })?;
    if config_block.data.len() != 1 {
        return Err(FatalError::CorruptLedger(format!(
            "config block {} holds {} transactions, expected 1",
            index,
            config_block.data.len()
        )));
    }

    let envelope = config_block.data.into_iter().next().ok_or_else(|| {
        FatalError::CorruptLedger(format!("config block {} is empty", index))
    })?;
    let header_type = envelope
        .channel_header()
        .map_err(|err| {
            FatalError::CorruptLedger(format!("config block {} envelope: {}", index, err))
        })?
        .header_type;
    if header_type != HeaderType::Config {
        return Err(FatalError::CorruptLedger(format!(
            "block {} holds a {:?} transaction, not a config transaction",
            index, header_type
        )));
    }
    Ok(envelope)
}
