use std::fmt::Display;

use alloy::{contract, primitives::Address, providers::PendingTransactionError, sol_types, transports};

use crate::store::StoreError;

/// Error returned by the keeper components, mostly as a result of RPC
/// calls or transaction execution.
#[derive(Debug, thiserror::Error)]
pub enum KeeperError {
    #[error("fatal error: {0}")]
    Fatal(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unexpected empty RPC response")]
    NullResp,

    #[error("transaction ran out of gas")]
    OutOfGas,

    #[error("transaction reverted: {0}")]
    Reverted(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("transaction timed out")]
    Timeout,

    #[error("no contract code at {0}")]
    ContractNotDeployed(Address),

    #[error("live log feed disconnected")]
    FeedDisconnected,

    #[error("state store error: {0}")]
    Store(#[from] StoreError),
}

impl KeeperError {
    /// Indicates RPC level failures expected to pass on their own,
    /// retried by the next scan or executor tick.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::NullResp | Self::Timeout)
    }
}

impl From<contract::Error> for KeeperError {
    fn from(value: contract::Error) -> Self {
        match value {
            contract::Error::UnknownFunction(_) => Self::Fatal(value.to_string()),
            contract::Error::UnknownSelector(_) => Self::Fatal(value.to_string()),
            contract::Error::NotADeploymentTransaction => Self::Fatal(value.to_string()),
            contract::Error::ContractNotDeployed => Self::Fatal(value.to_string()),
            contract::Error::ZeroData(_, _) => Self::Fatal(value.to_string()),
            contract::Error::AbiError(_) => Self::Fatal(value.to_string()),
            contract::Error::TransportError(rpc_err) => Self::from(rpc_err),
            contract::Error::PendingTransactionError(err) => err.into(),
        }
    }
}

impl From<PendingTransactionError> for KeeperError {
    fn from(value: PendingTransactionError) -> Self {
        match value {
            PendingTransactionError::FailedToRegister => Self::Fatal(value.to_string()),
            PendingTransactionError::TransportError(rpc_err) => Self::from(rpc_err),
            PendingTransactionError::Recv(_) => Self::Transport(value.to_string()),
            PendingTransactionError::TxWatcher(err) => match err {
                alloy::providers::WatchTxError::Timeout => Self::Timeout,
            },
        }
    }
}

impl<E: Display> From<transports::RpcError<E>> for KeeperError {
    fn from(value: transports::RpcError<E>) -> Self {
        match value {
            transports::RpcError::ErrorResp(ref resp) => {
                // Heuristic to tell gas exhaustion and reverts during estimation
                // apart from plain node failures
                let msg = resp.message.to_ascii_lowercase();
                if (resp.code == -32603) && (msg.contains("gas") || msg.contains("oog")) {
                    Self::OutOfGas
                } else if msg.contains("revert") {
                    Self::Reverted(resp.message.to_string())
                } else if (resp.code == -32600 || resp.code == -32601 || resp.code == -32602)
                    && (msg.contains("invalid") || msg.contains("not found"))
                {
                    Self::InvalidRequest(msg)
                } else {
                    Self::Transport(value.to_string())
                }
            }
            transports::RpcError::NullResp => Self::NullResp,
            _ => Self::Transport(value.to_string()),
        }
    }
}

impl From<sol_types::Error> for KeeperError {
    fn from(value: sol_types::Error) -> Self {
        Self::Fatal(value.to_string())
    }
}
