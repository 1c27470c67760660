mod event;

pub use event::*;

use alloy::{
    primitives::{Address, B256, U256, keccak256},
    sol_types::SolValue,
};

/// Protocol-assigned ID of a trade.
pub type TradeId = U256;

/// Direction independent ID of the token pair trades are grouped by.
pub type PairId = B256;

/// Derives the pair ID of two tokens regardless of which one is sold.
///
/// Addresses are ordered the way their lower-case hex renderings sort,
/// which is plain byte order, and the ABI-encoded sorted pair is hashed.
pub fn pair_id(token_a: Address, token_b: Address) -> PairId {
    let (lo, hi) = if token_a <= token_b {
        (token_a, token_b)
    } else {
        (token_b, token_a)
    };
    keccak256((lo, hi).abi_encode())
}

/// Position of a log in chain history.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Eq, Ord, Hash, Default)]
pub struct EventPosition {
    block_number: u64,
    log_index: u64,
}

impl EventPosition {
    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn log_index(&self) -> u64 {
        self.log_index
    }
}
