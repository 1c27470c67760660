//! Error types for the keeper.

use stream_keeper::{error::KeeperError, store::StoreError};

use crate::config::ConfigError;

/// Main error type for the keeper.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Environment configuration error: {0}")]
    EnvConfig(#[from] envy::Error),

    #[error("Alloy signer error: {0}")]
    AlloySigner(#[from] alloy::signers::local::LocalSignerError),

    #[error("Keeper error: {0}")]
    Keeper(#[from] KeeperError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid RPC URL: {0}")]
    InvalidRpcUrl(#[from] url::ParseError),

    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] alloy::primitives::hex::FromHexError),
}

pub type Result<T> = std::result::Result<T, Error>;
