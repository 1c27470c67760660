//! Access to the chain the core contract is deployed on.

use alloy::{
    primitives::TxHash,
    providers::{DynProvider, Provider},
    rpc::types::{Filter, Log},
};
use futures::{StreamExt, stream::BoxStream};

use crate::{
    Chain,
    abi::protocol::StreamCore::StreamCoreInstance,
    error::KeeperError,
    types::{PairId, TradeId},
};

/// Mined execution transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub gas_used: u64,
    pub success: bool,
}

/// Chain operations the keeper depends on.
pub trait ChainClient: Send + Sync + 'static {
    /// Current head block number.
    fn block_number(&self) -> impl Future<Output = Result<u64, KeeperError>> + Send;

    /// Logs emitted by the core contract within the inclusive block range.
    fn logs(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> impl Future<Output = Result<Vec<Log>, KeeperError>> + Send;

    /// Subscribes to logs emitted by the core contract from now on.
    fn subscribe_logs(
        &self,
    ) -> impl Future<Output = Result<BoxStream<'static, Log>, KeeperError>> + Send;

    /// Trades the contract still considers pending for the pair.
    fn outstanding_trade_ids(
        &self,
        pair_id: PairId,
    ) -> impl Future<Output = Result<Vec<TradeId>, KeeperError>> + Send;

    /// Gas estimate of the pair execution transaction.
    fn estimate_execute(
        &self,
        pair_id: PairId,
    ) -> impl Future<Output = Result<u64, KeeperError>> + Send;

    /// Submits the pair execution transaction and waits for its receipt.
    fn execute(
        &self,
        pair_id: PairId,
        gas_limit: u64,
    ) -> impl Future<Output = Result<ExecutionReceipt, KeeperError>> + Send;

    /// Fails with [`KeeperError::ContractNotDeployed`] if there is no
    /// contract code at the core address.
    fn ensure_deployed(&self) -> impl Future<Output = Result<(), KeeperError>> + Send;
}

/// [`ChainClient`] backed by alloy providers.
///
/// Calls and transactions go through the request provider, which is
/// expected to carry the signing wallet and
/// [`alloy::transports::layers::RetryBackoffLayer`]. Log subscriptions go
/// through the pubsub provider.
#[derive(Clone, derive_more::Debug)]
pub struct RpcChain {
    chain: Chain,
    #[debug(skip)]
    provider: DynProvider,
    #[debug(skip)]
    pubsub: DynProvider,
    #[debug(skip)]
    instance: StreamCoreInstance<DynProvider>,
}

impl RpcChain {
    pub fn new(chain: Chain, provider: DynProvider, pubsub: DynProvider) -> Self {
        let instance = StreamCoreInstance::new(chain.core(), provider.clone());
        Self {
            chain,
            provider,
            pubsub,
            instance,
        }
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    fn filter(&self) -> Filter {
        Filter::new().address(self.chain.core())
    }
}

impl ChainClient for RpcChain {
    async fn block_number(&self) -> Result<u64, KeeperError> {
        Ok(self.provider.get_block_number().await?)
    }

    async fn logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>, KeeperError> {
        let filter = self.filter().from_block(from_block).to_block(to_block);
        Ok(self.provider.get_logs(&filter).await?)
    }

    async fn subscribe_logs(&self) -> Result<BoxStream<'static, Log>, KeeperError> {
        let sub = self.pubsub.subscribe_logs(&self.filter()).await?;
        Ok(sub.into_stream().boxed())
    }

    async fn outstanding_trade_ids(&self, pair_id: PairId) -> Result<Vec<TradeId>, KeeperError> {
        Ok(self.instance.outstandingTradeIds(pair_id).call().await?)
    }

    async fn estimate_execute(&self, pair_id: PairId) -> Result<u64, KeeperError> {
        Ok(self.instance.executeTrades(pair_id).estimate_gas().await?)
    }

    async fn execute(
        &self,
        pair_id: PairId,
        gas_limit: u64,
    ) -> Result<ExecutionReceipt, KeeperError> {
        let receipt = self
            .instance
            .executeTrades(pair_id)
            .gas(gas_limit)
            .send()
            .await?
            .get_receipt()
            .await?;
        Ok(ExecutionReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
            success: receipt.status(),
        })
    }

    async fn ensure_deployed(&self) -> Result<(), KeeperError> {
        let code = self.provider.get_code_at(self.chain.core()).await?;
        if code.is_empty() {
            return Err(KeeperError::ContractNotDeployed(self.chain.core()));
        }
        Ok(())
    }
}
