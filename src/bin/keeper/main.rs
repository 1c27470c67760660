//! Streaming trade keeper.
//!
//! This binary keeps a local view of all streaming trades of the protocol
//! core contract and periodically executes pairs with outstanding work.

mod config;
mod error;
mod keeper;

use std::process::exit;

use alloy::{network::EthereumWallet, primitives::Address, signers::local::PrivateKeySigner};
use clap::Parser;
use stream_keeper::Chain;
use tracing::error;
use url::Url;

use config::{CliConfig, EnvConfig};
use keeper::Keeper;

#[tokio::main]
async fn main() {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Failed to load .env file: {}", e);
    }

    // Parse environment configuration
    let env_config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to parse environment configuration: {}", e);
            exit(1);
        }
    };

    // Parse CLI arguments
    let cli_config = CliConfig::parse();

    let keeper_config = match cli_config.to_keeper_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            exit(1);
        }
    };

    // Set up logging
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let core_address: Address = match env_config.core_address() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("Invalid core address: {}", e);
            exit(1);
        }
    };

    let private_key: PrivateKeySigner = match env_config.private_key.parse() {
        Ok(key) => key,
        Err(e) => {
            eprintln!("Invalid private key: {}", e);
            exit(1);
        }
    };

    let wallet = EthereumWallet::new(private_key);

    let node_url = match Url::parse(&env_config.node_rpc_url) {
        Ok(url) => url,
        Err(e) => {
            eprintln!("Invalid RPC URL: {}", e);
            exit(1);
        }
    };

    let ws_url = match Url::parse(&env_config.node_ws_url) {
        Ok(url) => url,
        Err(e) => {
            eprintln!("Invalid WebSocket URL: {}", e);
            exit(1);
        }
    };

    let chain = Chain::custom(
        env_config.chain_id,
        core_address,
        env_config.deployed_at_block,
    );

    let keeper = match Keeper::try_new(node_url, ws_url, wallet, chain, keeper_config).await {
        Ok(keeper) => keeper,
        Err(e) => {
            error!(%e, "Failed to start keeper");
            exit(1);
        }
    };

    if let Err(e) = keeper.run().await {
        error!(%e, "Keeper encountered an error, shutting down");
        exit(1);
    }
}
