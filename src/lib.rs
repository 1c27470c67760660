//! Streaming trade keeper.
//!
//! # Overview
//!
//! Keeps a durable materialized view of every streaming trade of the protocol
//! core contract, grouped by token pair, and periodically executes pairs
//! that still have outstanding work.
//!
//! Use [`scan::ColdScanner`] to catch up from the persisted cursor to the
//! chain head, then [`service::run`] to run [`listener::start`] and
//! [`executor::Executor`] side by side over the same [`state::SharedState`].
//!
//! Both ingestion paths funnel every decoded event through
//! [`state::State::apply_event`], which only ever writes absolute values,
//! so replaying a chunk or a live event is harmless.
//!
//! # Limitations/follow-ups
//!
//! * Live logs are trusted after a fixed confirmation depth, which is a
//!   reorg safety margin rather than a finality guarantee.
//!
//! * Losing the live subscription is fatal, an external supervisor is
//!   expected to restart the process so the cold scan can repair the gap.
//!
//! # Testing
//!
//! [`testing`] module provides an in-memory chain and state store to drive
//! the scanner, listener and executor without a node.

pub mod abi;
pub mod chain;
pub mod error;
pub mod executor;
pub mod listener;
pub mod num;
pub mod scan;
pub mod service;
pub mod state;
pub mod store;
pub mod stream;
pub mod testing;
pub mod types;

use alloy::primitives::Address;

#[derive(Clone, Debug)]
/// Chain the protocol core contract is deployed on.
pub struct Chain {
    chain_id: u64,
    core: Address,
    deployed_at_block: u64,
}

impl Chain {
    pub fn custom(chain_id: u64, core: Address, deployed_at_block: u64) -> Self {
        Self {
            chain_id,
            core,
            deployed_at_block,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    /// Address of the core contract emitting trade events.
    pub fn core(&self) -> Address {
        self.core
    }

    pub fn deployed_at_block(&self) -> u64 {
        self.deployed_at_block
    }
}
