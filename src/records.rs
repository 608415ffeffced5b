//! Records handed to the event sink.
//!
//! Every record is produced once per triggering event or tick and never
//! mutated afterwards. Decimal fields serialize as plain decimal strings.

use alloy::primitives::{Address, B256};
use bigdecimal::BigDecimal;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::tokens::amount::serialize_plain;

pub const TRANSFER_EVENT: &str = "usr_transfer";
pub const BALANCE_UPDATE_EVENT: &str = "usr_balance_update";
pub const TOTAL_SUPPLY_EVENT: &str = "usr_total_supply";
pub const ERROR_EVENT: &str = "error";

/// Lowercase `0x`-prefixed hex form used in every record.
pub fn format_address(address: &Address) -> String {
    format!("{:#x}", address)
}

pub fn format_hash(hash: &B256) -> String {
    format!("{:#x}", hash)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub distinct_id: String,
    pub from: String,
    pub to: String,
    #[serde(serialize_with = "serialize_plain")]
    pub amount: BigDecimal,
    pub network: String,
    pub block: u64,
    pub tx_hash: String,
    pub log_index: u64,
}

impl TransferRecord {
    pub fn distinct_id(tx_hash: &str, log_index: u64) -> String {
        format!("{}-{}", tx_hash, log_index)
    }
}

/// Direction of the balance change that triggered a holder refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateType {
    TransferIn,
    TransferOut,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransferIn => "transfer_in",
            Self::TransferOut => "transfer_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceUpdateRecord {
    pub distinct_id: String,
    pub holder: String,
    #[serde(serialize_with = "serialize_plain")]
    pub balance: BigDecimal,
    pub network: String,
    pub block: u64,
    pub update_type: UpdateType,
}

impl BalanceUpdateRecord {
    pub fn distinct_id(holder: &str, block: u64, log_index: u64) -> String {
        format!("{}-{}-{}", holder, block, log_index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplySnapshotRecord {
    pub distinct_id: String,
    #[serde(serialize_with = "serialize_plain")]
    pub total_supply: BigDecimal,
    pub network: String,
    pub block: u64,
}

impl SupplySnapshotRecord {
    pub fn distinct_id(network: &str, block: u64) -> String {
        format!("{}-{}", network, block)
    }
}

/// The three failure classes every handler path reports through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    ContractCallFailed,
    InvalidEventData,
    ProcessingError,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContractCallFailed => "CONTRACT_CALL_FAILED",
            Self::InvalidEventData => "INVALID_EVENT_DATA",
            Self::ProcessingError => "PROCESSING_ERROR",
        }
    }
}

/// Correlation fields attached to an error record. Absent fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
}

impl ErrorContext {
    pub fn at_block(block: u64) -> Self {
        Self {
            block: Some(block),
            ..Default::default()
        }
    }

    pub fn with_tx_hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = Some(tx_hash.into());
        self
    }

    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = Some(holder.into());
        self
    }

    pub fn with_parties(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self.to = Some(to.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub error_type: ErrorType,
    pub message: String,
    #[serde(flatten)]
    pub context: ErrorContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// One emission handed to the sink.
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    Transfer(TransferRecord),
    BalanceUpdate(BalanceUpdateRecord),
    TotalSupply(SupplySnapshotRecord),
    Error(ErrorRecord),
}

impl Emission {
    /// Event name as seen by downstream consumers.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Transfer(_) => TRANSFER_EVENT,
            Self::BalanceUpdate(_) => BALANCE_UPDATE_EVENT,
            Self::TotalSupply(_) => TOTAL_SUPPLY_EVENT,
            Self::Error(_) => ERROR_EVENT,
        }
    }

    /// Deduplication key, if the record carries one.
    pub fn distinct_id(&self) -> Option<&str> {
        match self {
            Self::Transfer(r) => Some(&r.distinct_id),
            Self::BalanceUpdate(r) => Some(&r.distinct_id),
            Self::TotalSupply(r) => Some(&r.distinct_id),
            Self::Error(_) => None,
        }
    }

    pub fn attributes(&self) -> serde_json::Result<JsonValue> {
        match self {
            Self::Transfer(r) => serde_json::to_value(r),
            Self::BalanceUpdate(r) => serde_json::to_value(r),
            Self::TotalSupply(r) => serde_json::to_value(r),
            Self::Error(r) => serde_json::to_value(r),
        }
    }
}
