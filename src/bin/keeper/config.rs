//! Configuration for the keeper.
//!
//! Configuration comes from two sources:
//! - Environment variables (via .env file or shell): connection details, keys
//! - CLI arguments: scanning and execution parameters

use std::{path::PathBuf, time::Duration};

use alloy::primitives::Address;
use clap::Parser;
use fastnum::{UD64, decimal::Context};
use stream_keeper::{executor::ExecutorConfig, num::GasMultiplier};

/// Environment configuration (connection details, credentials).
#[derive(Debug, serde::Deserialize)]
pub struct EnvConfig {
    /// Chain ID (e.g., 421614 for Arbitrum Sepolia)
    pub chain_id: u64,

    /// Core contract address
    pub core_address: String,

    /// Private key for signing execution transactions
    pub private_key: String,

    /// Block number when the core contract was deployed
    pub deployed_at_block: u64,

    /// HTTP RPC URL for calls, log queries and transactions
    pub node_rpc_url: String,

    /// WebSocket RPC URL for the live log subscription
    pub node_ws_url: String,
}

impl EnvConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// Parse the core contract address.
    pub fn core_address(&self) -> Result<Address, alloy::primitives::hex::FromHexError> {
        self.core_address.parse()
    }
}

/// CLI arguments for scanning and execution.
#[derive(Debug, Parser)]
#[command(name = "keeper")]
#[command(about = "Keeper executing outstanding streaming trades")]
pub struct CliConfig {
    /// Blocks per historical log query
    #[arg(long, default_value_t = 2000)]
    pub chunk_size: u64,

    /// Pairs executed concurrently within a tick
    #[arg(long, default_value_t = 4)]
    pub max_in_flight: usize,

    /// Multiplier applied to gas estimates (e.g., 1.2)
    #[arg(long, default_value = "1.2")]
    pub gas_multiplier: String,

    /// Blocks a live log must be buried under before it is applied
    #[arg(long, default_value_t = 3)]
    pub confirmations: u64,

    /// Seconds between executor ticks
    #[arg(long, default_value_t = 30)]
    pub tick_interval_secs: u64,

    /// Path of the state document
    #[arg(long, default_value = "keeper-state.json")]
    pub state_path: PathBuf,

    /// Seconds a fully completed pair is kept before pruning, 0 keeps pairs forever
    #[arg(long, default_value_t = 3600)]
    pub prune_after_secs: u64,
}

/// Validated keeper parameters.
#[derive(Clone, Debug)]
pub struct KeeperConfig {
    pub chunk_size: u64,
    pub confirmations: u64,
    pub state_path: PathBuf,
    pub executor: ExecutorConfig,
}

impl CliConfig {
    /// Convert CLI config to the validated KeeperConfig.
    pub fn to_keeper_config(&self) -> Result<KeeperConfig, ConfigError> {
        let gas_multiplier = UD64::from_str(&self.gas_multiplier, Context::default())
            .map_err(|_| ConfigError::InvalidGasMultiplier(self.gas_multiplier.clone()))?;

        if gas_multiplier < UD64::ONE {
            return Err(ConfigError::GasMultiplierBelowOne);
        }

        if self.chunk_size == 0 {
            return Err(ConfigError::Zero("chunk_size"));
        }

        if self.max_in_flight == 0 {
            return Err(ConfigError::Zero("max_in_flight"));
        }

        if self.tick_interval_secs == 0 {
            return Err(ConfigError::Zero("tick_interval_secs"));
        }

        let prune_after =
            (self.prune_after_secs > 0).then(|| Duration::from_secs(self.prune_after_secs));

        Ok(KeeperConfig {
            chunk_size: self.chunk_size,
            confirmations: self.confirmations,
            state_path: self.state_path.clone(),
            executor: ExecutorConfig {
                max_in_flight: self.max_in_flight,
                gas_multiplier: GasMultiplier::new(gas_multiplier),
                tick_interval: Duration::from_secs(self.tick_interval_secs),
                prune_after,
            },
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid gas multiplier value {0}")]
    InvalidGasMultiplier(String),

    #[error("gas_multiplier cannot be less than 1")]
    GasMultiplierBelowOne,

    #[error("{0} cannot be zero")]
    Zero(&'static str),
}
