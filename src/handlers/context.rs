//! Ports the handlers depend on, and the per-invocation context that carries them.
//!
//! All three collaborators are shared across concurrent invocations, so they
//! must be `Send + Sync` and are held behind `Arc`.

use alloy::primitives::Address;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::sync::Arc;

use crate::records::Emission;

/// Read access to the bound token contract.
///
/// Values are raw fixed-point integers. Reads are pinned to `block`.
#[async_trait]
pub trait TokenReader: Send + Sync {
    async fn balance_of(&self, holder: Address, block: u64) -> eyre::Result<BigDecimal>;

    /// `Ok(None)` means the call succeeded but returned nothing usable.
    async fn total_supply(&self, block: u64) -> eyre::Result<Option<BigDecimal>>;
}

/// Destination for emitted records. Emission never fails from the caller's view;
/// implementations log their own delivery problems and count them.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: Emission);

    /// Number of records that could not be delivered since the last call,
    /// resetting the count. The runner refuses to checkpoint past them.
    fn take_failures(&self) -> u64 {
        0
    }
}

/// Gauge recorder. A gauge sample overwrites the previous value for its label set.
pub trait Meter: Send + Sync {
    fn record_gauge(&self, name: &'static str, value: &BigDecimal, labels: &[(&'static str, String)]);
}

/// Everything a single handler invocation may touch.
#[derive(Clone)]
pub struct HandlerContext {
    pub block_number: u64,
    pub contract: Arc<dyn TokenReader>,
    pub sink: Arc<dyn EventSink>,
    pub meter: Arc<dyn Meter>,
}

impl HandlerContext {
    pub fn new(
        block_number: u64,
        contract: Arc<dyn TokenReader>,
        sink: Arc<dyn EventSink>,
        meter: Arc<dyn Meter>,
    ) -> Self {
        Self {
            block_number,
            contract,
            sink,
            meter,
        }
    }

    /// Same collaborators, different block.
    pub fn at_block(&self, block_number: u64) -> Self {
        Self {
            block_number,
            ..self.clone()
        }
    }
}
