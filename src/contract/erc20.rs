use alloy::eips::BlockId;
use alloy::primitives::Address;
use alloy::providers::Provider;
use alloy::sol;
use async_trait::async_trait;
use bigdecimal::BigDecimal;

use crate::handlers::context::TokenReader;
use crate::indexer::chain::retry_rpc;
use crate::tokens::amount::raw_from_u256;

// Generate the ERC-20 bindings using alloy's sol! macro.
// This gives us typed call builders plus Transfer::SIGNATURE_HASH.
sol! {
    #[sol(rpc)]
    interface IERC20 {
        event Transfer(address indexed from, address indexed to, uint256 value);

        function balanceOf(address account) external view returns (uint256);
        function totalSupply() external view returns (uint256);
    }
}

/// RPC-backed [`TokenReader`] for a single ERC-20 contract.
///
/// Transient failures are retried with backoff; whatever survives the retries
/// is returned to the handler, which reports it as a failed contract call.
pub struct Erc20Reader<P> {
    provider: P,
    address: Address,
    max_retries: u32,
}

impl<P> Erc20Reader<P>
where
    P: Provider + Clone,
{
    pub fn new(provider: P, address: Address, max_retries: u32) -> Self {
        Self {
            provider,
            address,
            max_retries,
        }
    }
}

#[async_trait]
impl<P> TokenReader for Erc20Reader<P>
where
    P: Provider + Clone + Send + Sync + 'static,
{
    async fn balance_of(&self, holder: Address, block: u64) -> eyre::Result<BigDecimal> {
        let contract = IERC20::new(self.address, self.provider.clone());

        let balance = retry_rpc(self.max_retries, || {
            let call = contract.balanceOf(holder).block(BlockId::number(block));
            async move { call.call().await }
        })
        .await?;

        tracing::trace!(holder = %holder, block, balance = %balance, "balanceOf");
        raw_from_u256(balance)
    }

    async fn total_supply(&self, block: u64) -> eyre::Result<Option<BigDecimal>> {
        let contract = IERC20::new(self.address, self.provider.clone());

        let supply = retry_rpc(self.max_retries, || {
            let call = contract.totalSupply().block(BlockId::number(block));
            async move { call.call().await }
        })
        .await?;

        tracing::trace!(block, supply = %supply, "totalSupply");
        raw_from_u256(supply).map(Some)
    }
}
