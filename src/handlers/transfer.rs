use alloy::primitives::Address;
use bigdecimal::BigDecimal;
use std::sync::Arc;

use crate::indexer::types::TransferEvent;
use crate::metrics::BALANCE_GAUGE;
use crate::records::{
    format_address, format_hash, BalanceUpdateRecord, Emission, ErrorContext, TransferRecord,
    UpdateType,
};
use crate::tokens::amount::{is_negative, scale_down};
use crate::tokens::exclusion::ExclusionFilter;

use super::context::HandlerContext;
use super::error::{guard, report, HandlerError};

const HANDLER_NAME: &str = "handle_transfer_event";

/// A transfer that passed validation, with its amount already scaled.
#[derive(Debug, Clone)]
struct ValidTransfer {
    from: Address,
    to: Address,
    amount: BigDecimal,
    tx_hash: String,
    log_index: u64,
}

#[derive(Debug, Clone, Copy)]
enum Side {
    Sender,
    Receiver,
}

impl Side {
    fn holder(&self, transfer: &ValidTransfer) -> Address {
        match self {
            Self::Sender => transfer.from,
            Self::Receiver => transfer.to,
        }
    }

    fn update_type(&self) -> UpdateType {
        match self {
            Self::Sender => UpdateType::TransferOut,
            Self::Receiver => UpdateType::TransferIn,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Receiver => "receiver",
        }
    }
}

/// Turns one Transfer event into a transfer record plus up to two holder
/// balance refreshes.
///
/// Sender and receiver are refreshed independently: a failed read on one side
/// is reported and the other side still runs. The zero address (mint/burn)
/// and excluded infrastructure contracts are never refreshed.
pub struct TransferHandler {
    network: String,
    decimals: u8,
    exclusions: Arc<ExclusionFilter>,
}

impl TransferHandler {
    pub fn new(network: impl Into<String>, decimals: u8, exclusions: Arc<ExclusionFilter>) -> Self {
        Self {
            network: network.into(),
            decimals,
            exclusions,
        }
    }

    /// Handle one event. Never fails; problems are emitted as error records.
    pub async fn handle(&self, event: &TransferEvent, ctx: &HandlerContext) {
        let mut fallback = ErrorContext::at_block(ctx.block_number);
        fallback.tx_hash = event.transaction_hash.as_ref().map(format_hash);

        guard(HANDLER_NAME, ctx, fallback, self.process(event, ctx)).await;
    }

    async fn process(&self, event: &TransferEvent, ctx: &HandlerContext) -> Result<(), HandlerError> {
        let transfer = self.validate(event, ctx.block_number)?;

        let record = TransferRecord {
            distinct_id: TransferRecord::distinct_id(&transfer.tx_hash, transfer.log_index),
            from: format_address(&transfer.from),
            to: format_address(&transfer.to),
            amount: transfer.amount.clone(),
            network: self.network.clone(),
            block: ctx.block_number,
            tx_hash: transfer.tx_hash.clone(),
            log_index: transfer.log_index,
        };

        tracing::debug!(
            block = ctx.block_number,
            tx_hash = %record.tx_hash,
            log_index = record.log_index,
            from = %record.from,
            to = %record.to,
            amount = %record.amount,
            "Transfer"
        );
        ctx.sink.emit(Emission::Transfer(record)).await;

        for side in [Side::Sender, Side::Receiver] {
            let holder = side.holder(&transfer);
            if !self.tracks(&holder) {
                tracing::trace!(side = side.label(), holder = %holder, "Skipping balance refresh");
                continue;
            }

            if let Err(err) = self.refresh_balance(side, &transfer, ctx).await {
                let fallback = ErrorContext::at_block(ctx.block_number)
                    .with_tx_hash(transfer.tx_hash.clone())
                    .with_holder(format_address(&holder));
                report(ctx, err.into_record(HANDLER_NAME, fallback)).await;
            }
        }

        Ok(())
    }

    fn validate(&self, event: &TransferEvent, block: u64) -> Result<ValidTransfer, HandlerError> {
        let Some(args) = event.args.as_ref() else {
            return Err(HandlerError::invalid(
                "Invalid transfer event: missing event or args",
                ErrorContext::at_block(block),
            ));
        };

        let Some(tx_hash) = event.transaction_hash.as_ref().map(format_hash) else {
            return Err(HandlerError::invalid(
                "Invalid transfer event: missing transaction hash",
                ErrorContext::at_block(block),
            ));
        };

        let (Some(from), Some(to)) = (args.from, args.to) else {
            return Err(HandlerError::invalid(
                "Invalid transfer event: missing from or to address",
                ErrorContext::at_block(block).with_tx_hash(tx_hash),
            ));
        };

        let value = match args.value.as_ref() {
            Some(value) if !is_negative(value) => value,
            _ => {
                return Err(HandlerError::invalid(
                    "Invalid transfer event: invalid value",
                    ErrorContext::at_block(block)
                        .with_tx_hash(tx_hash)
                        .with_parties(format_address(&from), format_address(&to)),
                ));
            }
        };

        Ok(ValidTransfer {
            from,
            to,
            amount: scale_down(value, self.decimals),
            tx_hash,
            log_index: event.log_index.unwrap_or(0),
        })
    }

    /// Whether a holder gets a balance refresh at all.
    fn tracks(&self, holder: &Address) -> bool {
        !holder.is_zero() && !self.exclusions.is_excluded(holder)
    }

    async fn refresh_balance(
        &self,
        side: Side,
        transfer: &ValidTransfer,
        ctx: &HandlerContext,
    ) -> Result<(), HandlerError> {
        let holder = side.holder(transfer);
        let holder_hex = format_address(&holder);
        let call_context = || {
            ErrorContext::at_block(ctx.block_number)
                .with_tx_hash(transfer.tx_hash.clone())
                .with_holder(holder_hex.clone())
        };

        let raw = ctx
            .contract
            .balance_of(holder, ctx.block_number)
            .await
            .map_err(|e| {
                HandlerError::contract_call(
                    format!("Failed to get balance for {}: {}", side.label(), e),
                    call_context(),
                )
            })?;

        if is_negative(&raw) {
            return Err(HandlerError::contract_call(
                format!("Failed to get balance for {}: negative balance {}", side.label(), raw),
                call_context(),
            ));
        }

        let balance = scale_down(&raw, self.decimals);
        let record = BalanceUpdateRecord {
            distinct_id: BalanceUpdateRecord::distinct_id(
                &holder_hex,
                ctx.block_number,
                transfer.log_index,
            ),
            holder: holder_hex.clone(),
            balance: balance.clone(),
            network: self.network.clone(),
            block: ctx.block_number,
            update_type: side.update_type(),
        };
        ctx.sink.emit(Emission::BalanceUpdate(record)).await;

        ctx.meter.record_gauge(
            BALANCE_GAUGE,
            &balance,
            &[("holder", holder_hex), ("network", self.network.clone())],
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::types::TransferArgs;
    use crate::records::{ErrorType, ERROR_EVENT, BALANCE_UPDATE_EVENT, TRANSFER_EVENT};
    use crate::sink::memory::{FakeReader, MemoryMeter, MemorySink};
    use alloy::primitives::B256;
    use std::str::FromStr;

    const USER1: &str = "0x1111111111111111111111111111111111111111";
    const USER2: &str = "0x2222222222222222222222222222222222222222";
    const SUPERFORM_ROUTER: &str = "0x7B8d68f90dAaC67C577936d3Ce451801864EF189";
    const MORPHO_BASE: &str = "0xbbbbbd1ba9b47a0a5b86e3f0efc5857ce6432bbb";

    fn addr(s: &str) -> Address {
        Address::from_str(&s.to_lowercase()).unwrap()
    }

    fn tokens(whole: u64) -> BigDecimal {
        BigDecimal::from(whole) * BigDecimal::from_str("1000000000000000000").unwrap()
    }

    fn handler() -> TransferHandler {
        TransferHandler::new("base", 18, Arc::new(ExclusionFilter::default()))
    }

    fn transfer(from: Address, to: Address, value: BigDecimal) -> TransferEvent {
        TransferEvent {
            transaction_hash: Some(B256::repeat_byte(0xab)),
            log_index: Some(0),
            args: Some(TransferArgs {
                from: Some(from),
                to: Some(to),
                value: Some(value),
            }),
        }
    }

    struct Harness {
        sink: Arc<MemorySink>,
        meter: Arc<MemoryMeter>,
        reader: Arc<FakeReader>,
        ctx: HandlerContext,
    }

    fn harness(block: u64, reader: FakeReader) -> Harness {
        let sink = MemorySink::new();
        let meter = MemoryMeter::new();
        let reader = Arc::new(reader);
        let ctx = HandlerContext::new(block, reader.clone(), sink.clone(), meter.clone());
        Harness {
            sink,
            meter,
            reader,
            ctx,
        }
    }

    #[tokio::test]
    async fn test_eoa_to_eoa_transfer() {
        let reader = FakeReader::default()
            .with_balance(addr(USER1), tokens(4_000))
            .with_balance(addr(USER2), tokens(1_000));
        let h = harness(100, reader);

        handler()
            .handle(&transfer(addr(USER1), addr(USER2), tokens(1_000)), &h.ctx)
            .await;

        assert_eq!(
            h.sink.names(),
            vec![TRANSFER_EVENT, BALANCE_UPDATE_EVENT, BALANCE_UPDATE_EVENT]
        );

        let transfers = h.sink.transfers();
        assert_eq!(transfers.len(), 1);
        let record = &transfers[0];
        assert_eq!(record.from, USER1);
        assert_eq!(record.to, USER2);
        assert_eq!(record.amount.normalized().to_plain_string(), "1000");
        assert_eq!(record.network, "base");
        assert_eq!(record.block, 100);
        assert_eq!(record.log_index, 0);
        assert_eq!(record.distinct_id, format!("{}-0", record.tx_hash));

        let updates = h.sink.balance_updates();
        assert_eq!(updates[0].holder, USER1);
        assert_eq!(updates[0].update_type, UpdateType::TransferOut);
        assert_eq!(updates[0].balance.normalized().to_plain_string(), "4000");
        assert_eq!(updates[0].distinct_id, format!("{}-100-0", USER1));
        assert_eq!(updates[1].holder, USER2);
        assert_eq!(updates[1].update_type, UpdateType::TransferIn);
        assert_eq!(updates[1].balance.normalized().to_plain_string(), "1000");

        assert_eq!(h.reader.balance_calls(), vec![(addr(USER1), 100), (addr(USER2), 100)]);

        let samples = h.meter.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].name, "usr_balance");
        assert_eq!(
            samples[0].labels,
            vec![("holder", USER1.to_string()), ("network", "base".to_string())]
        );
    }

    #[tokio::test]
    async fn test_mint_skips_sender() {
        let h = harness(100, FakeReader::default().with_balance(addr(USER1), tokens(5_000)));

        handler()
            .handle(&transfer(Address::ZERO, addr(USER1), tokens(5_000)), &h.ctx)
            .await;

        assert_eq!(h.sink.transfers().len(), 1);
        assert_eq!(h.sink.transfers()[0].from, "0x0000000000000000000000000000000000000000");
        let updates = h.sink.balance_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].holder, USER1);
        assert_eq!(updates[0].update_type, UpdateType::TransferIn);
        assert_eq!(h.reader.balance_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_burn_skips_receiver() {
        let h = harness(100, FakeReader::default());

        handler()
            .handle(&transfer(addr(USER1), Address::ZERO, tokens(2_000)), &h.ctx)
            .await;

        assert_eq!(h.sink.transfers()[0].amount.normalized().to_plain_string(), "2000");
        let updates = h.sink.balance_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].holder, USER1);
        assert_eq!(updates[0].update_type, UpdateType::TransferOut);
    }

    #[tokio::test]
    async fn test_excluded_contracts_skip_balance_refresh() {
        let h = harness(100, FakeReader::default());
        let handler = handler();

        // user -> router, then router -> morpho (deposit flow)
        handler
            .handle(&transfer(addr(USER1), addr(SUPERFORM_ROUTER), tokens(10_000)), &h.ctx)
            .await;
        handler
            .handle(&transfer(addr(SUPERFORM_ROUTER), addr(MORPHO_BASE), tokens(10_000)), &h.ctx)
            .await;

        let transfers = h.sink.transfers();
        assert_eq!(transfers.len(), 2);
        assert_eq!(transfers[0].to, SUPERFORM_ROUTER.to_lowercase());
        assert_eq!(transfers[1].from, SUPERFORM_ROUTER.to_lowercase());
        assert_eq!(transfers[1].to, MORPHO_BASE);

        let updates = h.sink.balance_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].holder, USER1);
        assert_eq!(h.meter.samples().len(), 1);
    }

    #[tokio::test]
    async fn test_zero_value_transfer_recorded() {
        let h = harness(100, FakeReader::default());

        handler()
            .handle(&transfer(addr(USER1), addr(USER2), BigDecimal::from(0)), &h.ctx)
            .await;

        let transfers = h.sink.transfers();
        assert_eq!(transfers.len(), 1);
        assert_eq!(transfers[0].amount.normalized().to_plain_string(), "0");
        assert!(h.sink.errors().is_empty());
    }

    #[tokio::test]
    async fn test_distinct_ids_follow_tx_hash_and_log_index() {
        let h = harness(100, FakeReader::default());
        let handler = handler();

        let first = transfer(addr(USER1), addr(USER2), tokens(1_000));
        let mut other_hash = transfer(addr(USER2), addr(USER1), tokens(2_000));
        other_hash.transaction_hash = Some(B256::repeat_byte(0x11));
        let mut other_index = first.clone();
        other_index.log_index = Some(3);

        handler.handle(&first, &h.ctx).await;
        handler.handle(&other_hash, &h.ctx).await;
        handler.handle(&other_index, &h.ctx).await;
        handler.handle(&first, &h.ctx).await;

        let ids: Vec<String> = h.sink.transfers().into_iter().map(|t| t.distinct_id).collect();
        assert_ne!(ids[0], ids[1]);
        assert_ne!(ids[0], ids[2]);
        assert_eq!(ids[0], ids[3]);
        assert!(ids[2].ends_with("-3"));
    }

    #[tokio::test]
    async fn test_missing_log_index_defaults_to_zero() {
        let h = harness(100, FakeReader::default());
        let mut event = transfer(addr(USER1), addr(USER2), tokens(1));
        event.log_index = None;

        handler().handle(&event, &h.ctx).await;

        assert_eq!(h.sink.transfers()[0].log_index, 0);
    }

    #[tokio::test]
    async fn test_negative_sender_balance_is_contract_failure() {
        let reader = FakeReader::default()
            .with_balance(addr(USER1), BigDecimal::from(-5))
            .with_balance(addr(USER2), tokens(3));
        let h = harness(100, reader);

        handler()
            .handle(&transfer(addr(USER1), addr(USER2), tokens(1)), &h.ctx)
            .await;

        assert_eq!(
            h.sink.names(),
            vec![TRANSFER_EVENT, ERROR_EVENT, BALANCE_UPDATE_EVENT]
        );

        let errors = h.sink.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ErrorType::ContractCallFailed);
        assert!(errors[0].message.starts_with("Failed to get balance for sender"));
        assert_eq!(errors[0].context.holder.as_deref(), Some(USER1));
        assert_eq!(errors[0].context.block, Some(100));

        let updates = h.sink.balance_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].holder, USER2);
        assert_eq!(updates[0].update_type, UpdateType::TransferIn);

        // Only the receiver reaches the gauge
        let samples = h.meter.samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].labels[0], ("holder", USER2.to_string()));
    }

    #[tokio::test]
    async fn test_panic_in_handler_is_processing_error() {
        let reader = FakeReader::default().panicking_for(addr(USER1));
        let h = harness(321, reader);

        handler()
            .handle(&transfer(addr(USER1), addr(USER2), tokens(1)), &h.ctx)
            .await;

        // The transfer record went out before the sender read blew up
        assert_eq!(h.sink.names(), vec![TRANSFER_EVENT, ERROR_EVENT]);

        let errors = h.sink.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ErrorType::ProcessingError);
        assert_eq!(
            errors[0].message,
            "Unexpected error in handle_transfer_event: balance decoder blew up"
        );
        assert_eq!(
            errors[0].context.tx_hash,
            Some(format_hash(&B256::repeat_byte(0xab)))
        );
        assert_eq!(errors[0].context.block, Some(321));
        assert_eq!(
            errors[0].stack.as_deref(),
            Some("panic: balance decoder blew up")
        );
        assert!(h.sink.balance_updates().is_empty());
    }

    #[tokio::test]
    async fn test_sender_failure_does_not_block_receiver() {
        let reader = FakeReader::default()
            .failing_for(addr(USER1))
            .with_balance(addr(USER2), tokens(7));
        let h = harness(100, reader);

        handler()
            .handle(&transfer(addr(USER1), addr(USER2), tokens(1)), &h.ctx)
            .await;

        assert_eq!(
            h.sink.names(),
            vec![TRANSFER_EVENT, ERROR_EVENT, BALANCE_UPDATE_EVENT]
        );

        let errors = h.sink.errors();
        assert_eq!(errors[0].error_type, ErrorType::ContractCallFailed);
        assert_eq!(errors[0].message, "Failed to get balance for sender: execution reverted");
        assert_eq!(errors[0].context.holder.as_deref(), Some(USER1));
        assert_eq!(errors[0].context.block, Some(100));
        assert!(errors[0].context.tx_hash.is_some());

        let updates = h.sink.balance_updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].holder, USER2);
    }

    #[tokio::test]
    async fn test_both_sides_failing() {
        let reader = FakeReader::default()
            .failing_for(addr(USER1))
            .failing_for(addr(USER2));
        let h = harness(100, reader);

        handler()
            .handle(&transfer(addr(USER1), addr(USER2), tokens(1)), &h.ctx)
            .await;

        assert_eq!(h.sink.transfers().len(), 1);
        let errors = h.sink.errors();
        assert_eq!(errors.len(), 2);
        assert!(errors[1].message.starts_with("Failed to get balance for receiver"));
        assert!(h.meter.samples().is_empty());
    }

    #[tokio::test]
    async fn test_missing_args_is_invalid() {
        let h = harness(100, FakeReader::default());
        let event = TransferEvent {
            transaction_hash: Some(B256::repeat_byte(0xab)),
            log_index: Some(0),
            args: None,
        };

        handler().handle(&event, &h.ctx).await;

        assert_eq!(h.sink.names(), vec![ERROR_EVENT]);
        let error = &h.sink.errors()[0];
        assert_eq!(error.error_type, ErrorType::InvalidEventData);
        assert_eq!(error.message, "Invalid transfer event: missing event or args");
        assert_eq!(error.context.block, Some(100));
        assert!(h.reader.balance_calls().is_empty());
    }

    #[tokio::test]
    async fn test_missing_address_is_invalid() {
        let h = harness(100, FakeReader::default());
        let mut event = transfer(addr(USER1), addr(USER2), tokens(1));
        if let Some(args) = event.args.as_mut() {
            args.to = None;
        }

        handler().handle(&event, &h.ctx).await;

        let errors = h.sink.errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, ErrorType::InvalidEventData);
        assert_eq!(errors[0].message, "Invalid transfer event: missing from or to address");
        assert!(errors[0].context.tx_hash.is_some());
        assert!(h.sink.transfers().is_empty());
    }

    #[tokio::test]
    async fn test_negative_or_missing_value_is_invalid() {
        let h = harness(100, FakeReader::default());
        let handler = handler();

        let negative = transfer(addr(USER1), addr(USER2), BigDecimal::from(-5));
        let mut missing = transfer(addr(USER1), addr(USER2), tokens(1));
        if let Some(args) = missing.args.as_mut() {
            args.value = None;
        }

        handler.handle(&negative, &h.ctx).await;
        handler.handle(&missing, &h.ctx).await;

        let errors = h.sink.errors();
        assert_eq!(errors.len(), 2);
        for error in &errors {
            assert_eq!(error.error_type, ErrorType::InvalidEventData);
            assert_eq!(error.message, "Invalid transfer event: invalid value");
            assert_eq!(error.context.from.as_deref(), Some(USER1));
            assert_eq!(error.context.to.as_deref(), Some(USER2));
        }
        assert!(h.sink.transfers().is_empty());
        assert!(h.sink.balance_updates().is_empty());
    }

    #[tokio::test]
    async fn test_missing_tx_hash_is_invalid() {
        let h = harness(100, FakeReader::default());
        let mut event = transfer(addr(USER1), addr(USER2), tokens(1));
        event.transaction_hash = None;

        handler().handle(&event, &h.ctx).await;

        assert_eq!(h.sink.errors()[0].error_type, ErrorType::InvalidEventData);
        assert!(h.sink.transfers().is_empty());
    }
}
