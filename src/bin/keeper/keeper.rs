//! Keeper orchestration.
//!
//! Catches up with the chain through the cold scan, then runs the live
//! listener and the executor side by side until the listener fails or
//! shutdown is requested.

use std::sync::Arc;

use alloy::{
    network::EthereumWallet,
    providers::{DynProvider, ProviderBuilder, WsConnect},
    rpc::client::RpcClient,
    transports::layers::RetryBackoffLayer,
};
use stream_keeper::{
    Chain,
    chain::{ChainClient, RpcChain},
    error::KeeperError,
    scan::ColdScanner,
    service,
    state::SharedState,
    store::JsonFileStore,
};
use tracing::info;
use url::Url;

use crate::{config::KeeperConfig, error::Result};

/// Rate limit retries of the HTTP client.
const MAX_RETRIES: u32 = 10;
const INITIAL_BACKOFF_MS: u64 = 100;
const COMPUTE_UNITS_PER_SECOND: u64 = 200;

#[derive(Debug)]
pub struct Keeper {
    chain: Chain,
    client: Arc<RpcChain>,
    state: SharedState<JsonFileStore>,
    config: KeeperConfig,
}

impl Keeper {
    /// Connects to the node, checks the core contract is deployed and loads
    /// the persisted state.
    pub async fn try_new(
        node_url: Url,
        ws_url: Url,
        wallet: EthereumWallet,
        chain: Chain,
        config: KeeperConfig,
    ) -> Result<Self> {
        let wallet_address = wallet.default_signer().address();
        info!(
            %wallet_address,
            core = %chain.core(),
            chain_id = chain.chain_id(),
            state_path = %config.state_path.display(),
            "Initializing keeper"
        );

        let rpc_client = RpcClient::builder()
            .layer(RetryBackoffLayer::new(
                MAX_RETRIES,
                INITIAL_BACKOFF_MS,
                COMPUTE_UNITS_PER_SECOND,
            ))
            .http(node_url);
        let provider = DynProvider::new(
            ProviderBuilder::new()
                .wallet(wallet)
                .connect_client(rpc_client),
        );
        let pubsub = DynProvider::new(
            ProviderBuilder::new()
                .connect_ws(WsConnect::new(ws_url))
                .await
                .map_err(KeeperError::from)?,
        );

        let client = Arc::new(RpcChain::new(chain.clone(), provider, pubsub));
        client.ensure_deployed().await?;

        let state = SharedState::load(JsonFileStore::new(&config.state_path))?;
        state
            .read(|s| {
                info!(
                    pairs = s.pairs().len(),
                    unassigned = s.unassigned().len(),
                    last_scanned_block = ?s.last_scanned_block(),
                    "State loaded"
                )
            })
            .await;

        Ok(Self {
            chain,
            client,
            state,
            config,
        })
    }

    /// Runs the keeper until the listener fails or shutdown is requested,
    /// persisting the state one last time on the way out.
    pub async fn run(&self) -> Result<()> {
        let scanner = ColdScanner::new(
            self.client.clone(),
            self.state.clone(),
            self.config.chunk_size,
        );
        scanner.scan(self.chain.deployed_at_block()).await?;

        service::run(
            self.client.clone(),
            self.state.clone(),
            self.config.confirmations,
            self.config.executor.clone(),
            tokio::signal::ctrl_c(),
        )
        .await?;
        Ok(())
    }
}
