use alloy::primitives::Address;
use std::sync::Arc;

use crate::config::ProcessorConfig;
use crate::tokens::exclusion::{parse_address, ExclusionFilter};

use super::supply::SupplySnapshotHandler;
use super::transfer::TransferHandler;

pub const BASE_CHAIN: &str = "base";
pub const BASE_CHAIN_ID: u64 = 8453;

/// Immutable registration for one token on one network.
#[derive(Debug, Clone)]
pub struct BindingConfig {
    pub address: Address,
    pub network: String,
    pub chain_id: u64,
    pub start_block: u64,
    /// Snapshot interval once the runner is at the chain head.
    pub time_interval_secs: u64,
    /// Snapshot interval while catching up on history.
    pub backfill_interval_secs: u64,
    pub decimals: u8,
    pub exclusions: Arc<ExclusionFilter>,
}

impl BindingConfig {
    pub fn from_config(config: &ProcessorConfig) -> eyre::Result<Self> {
        let address = parse_address(&config.token_address)?;
        let exclusions = ExclusionFilter::new(&config.excluded_contracts)?;

        Ok(Self {
            address,
            network: BASE_CHAIN.to_string(),
            chain_id: BASE_CHAIN_ID,
            start_block: config.start_block,
            time_interval_secs: config.time_interval_minutes * 60,
            backfill_interval_secs: config.backfill_interval_minutes * 60,
            decimals: config.decimals,
            exclusions: Arc::new(exclusions),
        })
    }

    /// Interval that applies given whether the runner has reached the head.
    pub fn interval_secs(&self, live: bool) -> u64 {
        if live {
            self.time_interval_secs
        } else {
            self.backfill_interval_secs
        }
    }
}

/// The handler set produced by [`bind`].
pub struct Processor {
    pub binding: BindingConfig,
    pub transfers: TransferHandler,
    pub snapshots: SupplySnapshotHandler,
}

/// Build the handlers for a binding. The binding is frozen from here on.
pub fn bind(binding: BindingConfig) -> Processor {
    let transfers = TransferHandler::new(
        binding.network.clone(),
        binding.decimals,
        binding.exclusions.clone(),
    );
    let snapshots = SupplySnapshotHandler::new(binding.network.clone(), binding.decimals);

    tracing::info!(
        address = %binding.address,
        network = %binding.network,
        start_block = binding.start_block,
        excluded = binding.exclusions.count(),
        "Bound token processor"
    );

    Processor {
        binding,
        transfers,
        snapshots,
    }
}
