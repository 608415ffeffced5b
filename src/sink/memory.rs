//! In-memory collaborators for handler tests.

use alloy::primitives::Address;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::handlers::context::{EventSink, HandlerContext, Meter, TokenReader};
use crate::records::{
    BalanceUpdateRecord, Emission, ErrorRecord, SupplySnapshotRecord, TransferRecord,
};

/// Collects every emission in order.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Emission>>,
}

impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Emission> {
        self.events.lock().unwrap().clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|e| e.name()).collect()
    }

    pub fn transfers(&self) -> Vec<TransferRecord> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Emission::Transfer(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn balance_updates(&self) -> Vec<BalanceUpdateRecord> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Emission::BalanceUpdate(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn snapshots(&self) -> Vec<SupplySnapshotRecord> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Emission::TotalSupply(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Emission::Error(r) => Some(r),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn emit(&self, event: Emission) {
        self.events.lock().unwrap().push(event);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GaugeSample {
    pub name: &'static str,
    pub value: BigDecimal,
    pub labels: Vec<(&'static str, String)>,
}

#[derive(Default)]
pub struct MemoryMeter {
    samples: Mutex<Vec<GaugeSample>>,
}

impl MemoryMeter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn samples(&self) -> Vec<GaugeSample> {
        self.samples.lock().unwrap().clone()
    }
}

impl Meter for MemoryMeter {
    fn record_gauge(&self, name: &'static str, value: &BigDecimal, labels: &[(&'static str, String)]) {
        self.samples.lock().unwrap().push(GaugeSample {
            name,
            value: value.clone(),
            labels: labels.to_vec(),
        });
    }
}

/// What the fake reader answers for `totalSupply()`.
#[derive(Debug, Clone)]
pub enum SupplyReply {
    Value(BigDecimal),
    Absent,
    Fail(String),
}

/// Scripted [`TokenReader`]. Unknown holders read as zero.
pub struct FakeReader {
    balances: HashMap<Address, BigDecimal>,
    failing: HashSet<Address>,
    panicking: HashSet<Address>,
    supply: SupplyReply,
    balance_calls: Mutex<Vec<(Address, u64)>>,
}

impl Default for FakeReader {
    fn default() -> Self {
        Self {
            balances: HashMap::new(),
            failing: HashSet::new(),
            panicking: HashSet::new(),
            supply: SupplyReply::Absent,
            balance_calls: Mutex::new(Vec::new()),
        }
    }
}

impl FakeReader {
    pub fn with_balance(mut self, holder: Address, raw: BigDecimal) -> Self {
        self.balances.insert(holder, raw);
        self
    }

    pub fn failing_for(mut self, holder: Address) -> Self {
        self.failing.insert(holder);
        self
    }

    /// Reading this holder's balance panics.
    pub fn panicking_for(mut self, holder: Address) -> Self {
        self.panicking.insert(holder);
        self
    }

    pub fn with_supply(mut self, reply: SupplyReply) -> Self {
        self.supply = reply;
        self
    }

    pub fn balance_calls(&self) -> Vec<(Address, u64)> {
        self.balance_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenReader for FakeReader {
    async fn balance_of(&self, holder: Address, block: u64) -> eyre::Result<BigDecimal> {
        self.balance_calls.lock().unwrap().push((holder, block));
        if self.panicking.contains(&holder) {
            panic!("balance decoder blew up");
        }
        if self.failing.contains(&holder) {
            return Err(eyre::eyre!("execution reverted"));
        }
        Ok(self.balances.get(&holder).cloned().unwrap_or_default())
    }

    async fn total_supply(&self, _block: u64) -> eyre::Result<Option<BigDecimal>> {
        match &self.supply {
            SupplyReply::Value(v) => Ok(Some(v.clone())),
            SupplyReply::Absent => Ok(None),
            SupplyReply::Fail(msg) => Err(eyre::eyre!("{}", msg)),
        }
    }
}

/// Context with a default reader and a throwaway meter.
pub fn test_context(block: u64, sink: Arc<MemorySink>) -> HandlerContext {
    HandlerContext::new(block, Arc::new(FakeReader::default()), sink, MemoryMeter::new())
}
