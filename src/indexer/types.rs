use alloy::primitives::{Address, B256};
use bigdecimal::BigDecimal;

/// A token Transfer event as delivered to the transfer handler.
///
/// Fields the transport may fail to supply are optional. A missing
/// `log_index` defaults to 0; everything else missing is invalid event data.
#[derive(Debug, Clone, Default)]
pub struct TransferEvent {
    pub transaction_hash: Option<B256>,
    pub log_index: Option<u64>,
    pub args: Option<TransferArgs>,
}

/// Decoded Transfer arguments. `value` is the raw fixed-point integer.
#[derive(Debug, Clone, Default)]
pub struct TransferArgs {
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub value: Option<BigDecimal>,
}

/// A periodic timer firing, pinned to the block it was evaluated at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTick {
    pub block_number: u64,
    pub timestamp: u64,
}

/// Minimal block info the runner needs to schedule ticks.
#[derive(Debug, Clone, Copy)]
pub struct BlockInfo {
    pub block_number: u64,
    pub timestamp: u64,
}
