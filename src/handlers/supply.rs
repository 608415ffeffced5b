use crate::indexer::types::TimerTick;
use crate::metrics::TOTAL_SUPPLY_GAUGE;
use crate::records::{Emission, ErrorContext, SupplySnapshotRecord};
use crate::tokens::amount::{is_negative, scale_down};

use super::context::HandlerContext;
use super::error::{guard, HandlerError};

const HANDLER_NAME: &str = "handle_time_interval";

/// Reads total supply on each timer tick and emits a snapshot.
///
/// The handler knows nothing about the interval; the runner decides when
/// ticks fire.
pub struct SupplySnapshotHandler {
    network: String,
    decimals: u8,
}

impl SupplySnapshotHandler {
    pub fn new(network: impl Into<String>, decimals: u8) -> Self {
        Self {
            network: network.into(),
            decimals,
        }
    }

    /// Handle one tick. Never fails; problems are emitted as error records.
    pub async fn handle(&self, tick: &TimerTick, ctx: &HandlerContext) {
        guard(
            HANDLER_NAME,
            ctx,
            ErrorContext::at_block(ctx.block_number),
            self.process(tick, ctx),
        )
        .await;
    }

    async fn process(&self, tick: &TimerTick, ctx: &HandlerContext) -> Result<(), HandlerError> {
        let block = ctx.block_number;

        let supply = ctx.contract.total_supply(block).await.map_err(|e| {
            HandlerError::contract_call(
                format!("Failed to get total supply: {}", e),
                ErrorContext::at_block(block),
            )
        })?;

        let raw = match supply {
            Some(raw) if !is_negative(&raw) => raw,
            _ => {
                return Err(HandlerError::invalid(
                    "Invalid total supply value",
                    ErrorContext::at_block(block),
                ));
            }
        };

        let total_supply = scale_down(&raw, self.decimals);
        tracing::info!(
            block,
            timestamp = tick.timestamp,
            total_supply = %total_supply,
            "Total supply snapshot"
        );

        let record = SupplySnapshotRecord {
            distinct_id: SupplySnapshotRecord::distinct_id(&self.network, block),
            total_supply: total_supply.clone(),
            network: self.network.clone(),
            block,
        };
        ctx.sink.emit(Emission::TotalSupply(record)).await;

        ctx.meter.record_gauge(
            TOTAL_SUPPLY_GAUGE,
            &total_supply,
            &[("network", self.network.clone())],
        );

        Ok(())
    }
}
