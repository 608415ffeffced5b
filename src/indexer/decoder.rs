use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;

use crate::contract::erc20::IERC20::Transfer;
use crate::tokens::amount::raw_from_u256;

use super::types::{TransferArgs, TransferEvent};

/// Decode a log emitted by the bound token into a [`TransferEvent`].
///
/// Returns `None` if the log comes from another contract or is not a
/// Transfer. A Transfer log whose topics or data are malformed still yields an
/// event, with `args` left empty, so the handler can report it.
pub fn decode_transfer_log(log: &Log, token: &Address) -> Option<TransferEvent> {
    let inner = &log.inner;
    if &inner.address != token {
        return None;
    }

    let topics = inner.data.topics();
    if topics.first() != Some(&Transfer::SIGNATURE_HASH) {
        return None;
    }

    let args = decode_args(topics, inner.data.data.as_ref());
    if args.is_none() {
        tracing::debug!(
            tx_hash = ?log.transaction_hash,
            log_index = ?log.log_index,
            topics = topics.len(),
            "Malformed Transfer log"
        );
    }

    Some(TransferEvent {
        transaction_hash: log.transaction_hash,
        log_index: log.log_index,
        args,
    })
}

fn decode_args(topics: &[alloy::primitives::B256], data: &[u8]) -> Option<TransferArgs> {
    // signature + from + to, and a single 32-byte value word
    if topics.len() != 3 || data.len() < 32 {
        return None;
    }

    let from = Address::from_word(topics[1]);
    let to = Address::from_word(topics[2]);
    let value = U256::from_be_slice(&data[..32]);

    Some(TransferArgs {
        from: Some(from),
        to: Some(to),
        value: raw_from_u256(value).ok(),
    })
}
