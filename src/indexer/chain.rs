use alloy::providers::Provider;
use alloy::rpc::types::{BlockNumberOrTag, Filter};
use alloy::sol_types::SolEvent;
use futures::StreamExt;
use sqlx::PgPool;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::ChainConfig;
use crate::contract::erc20::IERC20;
use crate::db::repository;
use crate::handlers::binding::Processor;
use crate::handlers::context::{EventSink, HandlerContext};
use crate::indexer::decoder;
use crate::indexer::types::{BlockInfo, TimerTick, TransferEvent};
use crate::metrics::record_blocks_processed;

/// Decides when the supply snapshot fires.
///
/// A tick is due once `interval_secs` have passed since the last one, measured
/// in block time. The first evaluation always fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickSchedule {
    last_fired: Option<u64>,
}

impl TickSchedule {
    pub fn new(last_fired: Option<u64>) -> Self {
        Self { last_fired }
    }

    pub fn due(&mut self, timestamp: u64, interval_secs: u64) -> bool {
        match self.last_fired {
            Some(last) if timestamp < last.saturating_add(interval_secs) => false,
            _ => {
                self.last_fired = Some(timestamp);
                true
            }
        }
    }

    pub fn last_fired(&self) -> Option<u64> {
        self.last_fired
    }
}

/// Fail the range if the sink dropped any of its records, so the checkpoint
/// stays put and the range is processed again.
fn ensure_delivered(sink: &dyn EventSink, from: u64, to: u64) -> eyre::Result<()> {
    match sink.take_failures() {
        0 => Ok(()),
        failed => Err(eyre::eyre!(
            "{} record(s) in blocks {}..={} were not persisted",
            failed,
            from,
            to
        )),
    }
}

/// Last block of the range starting at `from`, capped at `tip`.
fn range_end(from: u64, tip: u64, batch_size: u64) -> u64 {
    std::cmp::min(from.saturating_add(batch_size.max(1) - 1), tip)
}

/// Drives the bound handlers over the chain: backfill from the checkpoint to
/// the tip, then poll for new blocks until shutdown.
pub struct ChainRunner<P> {
    provider: P,
    chain: ChainConfig,
    max_concurrent: usize,
    processor: Processor,
    ctx: HandlerContext,
    checkpoint: Option<PgPool>,
    schedule: TickSchedule,
}

impl<P: Provider> ChainRunner<P> {
    pub fn new(
        provider: P,
        chain: ChainConfig,
        max_concurrent: usize,
        processor: Processor,
        ctx: HandlerContext,
        checkpoint: Option<PgPool>,
    ) -> Self {
        Self {
            provider,
            chain,
            max_concurrent,
            processor,
            ctx,
            checkpoint,
            schedule: TickSchedule::default(),
        }
    }

    pub async fn run(mut self, shutdown: CancellationToken) -> eyre::Result<()> {
        let network = self.processor.binding.network.clone();
        tracing::info!(network = %network, "Starting processor");

        self.check_chain_id().await;

        let mut next = self.resume_block().await?;

        // Phase 1: catch up to the tip
        if !shutdown.is_cancelled() {
            let tip = retry_rpc(self.chain.rpc_max_retries, || self.provider.get_block_number()).await?;
            if next > tip {
                tracing::info!(start_block = next, tip, "Already past chain tip, skipping backfill");
            } else {
                tracing::info!(from = next, tip, "Starting backfill");
                self.catch_up(&mut next, tip, false, &shutdown).await?;
                tracing::info!(network = %network, "Backfill complete");
            }
        }

        // Phase 2: follow the head
        if !shutdown.is_cancelled() {
            self.follow(next, &shutdown).await?;
        }

        tracing::info!(network = %network, "Processor stopped");
        Ok(())
    }

    async fn check_chain_id(&self) {
        let expected = self.processor.binding.chain_id;
        match retry_rpc(self.chain.rpc_max_retries, || self.provider.get_chain_id()).await {
            Ok(chain_id) if chain_id == expected => {
                tracing::info!(chain_id, "Connected to expected chain");
            }
            Ok(chain_id) => {
                tracing::warn!(chain_id, expected, "RPC endpoint serves a different chain");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not verify chain id");
            }
        }
    }

    /// First block to process and the restored snapshot schedule.
    async fn resume_block(&mut self) -> eyre::Result<u64> {
        let start_block = self.processor.binding.start_block;
        let Some(pool) = &self.checkpoint else {
            return Ok(start_block);
        };

        let network = &self.processor.binding.network;
        let last_indexed = repository::get_last_indexed_block(pool, network).await?;
        let last_snapshot = repository::get_last_snapshot_timestamp(pool, network).await?;
        self.schedule = TickSchedule::new(last_snapshot);

        let next = last_indexed.map(|b| b + 1).unwrap_or(start_block).max(start_block);
        tracing::info!(
            last_indexed = ?last_indexed,
            last_snapshot = ?last_snapshot,
            next,
            "Resuming from checkpoint"
        );
        Ok(next)
    }

    /// Process `[*next, tip]` in batches, advancing `next` past each range
    /// that completes.
    async fn catch_up(
        &mut self,
        next: &mut u64,
        tip: u64,
        live: bool,
        shutdown: &CancellationToken,
    ) -> eyre::Result<()> {
        let from = *next;
        let total_blocks = tip - from + 1;

        while *next <= tip && !shutdown.is_cancelled() {
            let current = *next;
            let to_block = range_end(current, tip, self.chain.batch_size);

            if !live {
                let progress = ((current - from) as f64 / total_blocks as f64 * 100.0) as u32;
                tracing::info!(
                    from = current,
                    to = to_block,
                    progress = %format!("{}%", progress),
                    "Backfilling block range"
                );
            }

            self.process_range(current, to_block, live).await?;
            *next = to_block + 1;
        }

        Ok(())
    }

    async fn follow(&mut self, mut next: u64, shutdown: &CancellationToken) -> eyre::Result<()> {
        let poll_interval = Duration::from_millis(self.chain.poll_interval_ms);
        tracing::info!(poll_interval_ms = self.chain.poll_interval_ms, next, "Following chain head");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.cancelled() => {
                    tracing::info!("Shutdown received, stopping poller");
                    break;
                }
            }

            let tip = match retry_rpc(self.chain.rpc_max_retries, || self.provider.get_block_number()).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to get block number");
                    continue;
                }
            };

            if tip < next {
                continue;
            }

            if let Err(e) = self.catch_up(&mut next, tip, true, shutdown).await {
                // The failed range is retried on the next poll
                tracing::error!(from = next, tip, error = %e, "Failed to process blocks");
            }
        }

        Ok(())
    }

    /// Fetch, decode and dispatch one block range, then fire the snapshot if
    /// due and advance the checkpoint.
    async fn process_range(&mut self, from: u64, to: u64, live: bool) -> eyre::Result<()> {
        let token = self.processor.binding.address;
        let filter = Filter::new()
            .address(token)
            .event_signature(IERC20::Transfer::SIGNATURE_HASH)
            .from_block(from)
            .to_block(to);

        let logs = retry_rpc(self.chain.rpc_max_retries, || self.provider.get_logs(&filter)).await?;

        let mut events: Vec<(u64, TransferEvent)> = Vec::with_capacity(logs.len());
        for log in &logs {
            let Some(block) = log.block_number else {
                tracing::warn!(tx_hash = ?log.transaction_hash, "Log without block number, skipping");
                continue;
            };
            if let Some(event) = decoder::decode_transfer_log(log, &token) {
                events.push((block, event));
            }
        }

        if !events.is_empty() {
            tracing::debug!(from, to, transfers = events.len(), "Dispatching transfers");
        }

        let transfers = &self.processor.transfers;
        let ctx = &self.ctx;
        futures::stream::iter(events)
            .for_each_concurrent(self.max_concurrent, |(block, event)| {
                let ctx = ctx.at_block(block);
                async move { transfers.handle(&event, &ctx).await }
            })
            .await;

        let last = self.block_info(to).await?;
        let interval = self.processor.binding.interval_secs(live);
        let mut schedule = self.schedule;
        if schedule.due(last.timestamp, interval) {
            let tick = TimerTick {
                block_number: last.block_number,
                timestamp: last.timestamp,
            };
            self.processor
                .snapshots
                .handle(&tick, &self.ctx.at_block(last.block_number))
                .await;
        }

        ensure_delivered(self.ctx.sink.as_ref(), from, to)?;
        self.schedule = schedule;

        if let Some(pool) = &self.checkpoint {
            repository::upsert_processor_state(
                pool,
                &self.processor.binding.network,
                to,
                self.schedule.last_fired(),
            )
            .await?;
        }
        record_blocks_processed(to - from + 1);

        Ok(())
    }

    async fn block_info(&self, number: u64) -> eyre::Result<BlockInfo> {
        let block = retry_rpc(self.chain.rpc_max_retries, || async {
            self.provider
                .get_block_by_number(BlockNumberOrTag::Number(number))
                .await
        })
        .await?
        .ok_or_else(|| eyre::eyre!("Block {} not found", number))?;

        Ok(BlockInfo {
            block_number: number,
            timestamp: block.header.timestamp,
        })
    }
}

/// Retry an async operation with exponential backoff.
/// Handles transient RPC errors (rate limits, network issues).
pub async fn retry_rpc<F, Fut, T, E>(max_retries: u32, mut f: F) -> eyre::Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = Duration::from_millis(500);

    for attempt in 0..max_retries {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "RPC call failed, retrying..."
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }
        }
    }

    // Final attempt, propagate the error
    f().await.map_err(|e| eyre::eyre!("RPC call failed after {} retries: {}", max_retries, e))
}
