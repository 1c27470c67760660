//! In-memory chain and state store for driving the keeper without a node.
//!
//! [`MockChain`] serves historical logs, a live log feed, per pair
//! execution queues and scripted failures, recording every query and
//! transaction so tests can assert on them.
//!
//! [`MemoryStore`] keeps the last saved snapshot, counts saves and can be
//! made to fail them.
//!
//! [`log`] and the event constructors build core contract logs.

use std::{
    collections::HashMap,
    io,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use alloy::{
    primitives::{self, Address, B256, U256, address},
    rpc::types::Log,
    sol_types::SolEvent,
};
use futures::{StreamExt, stream::BoxStream};
use tokio::sync::mpsc;

use crate::{
    abi::protocol::StreamCore,
    chain::{ChainClient, ExecutionReceipt},
    error::KeeperError,
    state::State,
    store::{StateStore, StoreError},
    types::{PairId, TradeId},
};

/// Core contract address used by [`MockChain`].
pub const CORE: Address = address!("0x00000000000000000000000000000000c0de0001");

/// Gas estimate [`MockChain`] reports unless configured otherwise.
pub const DEFAULT_ESTIMATE: u64 = 100_000;

#[derive(Debug)]
pub struct MockChain {
    inner: Mutex<MockInner>,
}

#[derive(Debug)]
struct MockInner {
    head: u64,
    head_fails: bool,
    logs: Vec<Log>,
    logs_fail_at: Option<u64>,
    log_queries: Vec<(u64, u64)>,
    queues: HashMap<PairId, Vec<TradeId>>,
    queue_queries: Vec<PairId>,
    estimate: u64,
    execute_failures: HashMap<PairId, String>,
    receipts_fail: bool,
    executed: Vec<(PairId, u64)>,
    deployed: bool,
    feed: Option<mpsc::UnboundedSender<Log>>,
}

impl MockChain {
    pub fn new(head: u64) -> Self {
        Self {
            inner: Mutex::new(MockInner {
                head,
                head_fails: false,
                logs: vec![],
                logs_fail_at: None,
                log_queries: vec![],
                queues: HashMap::new(),
                queue_queries: vec![],
                estimate: DEFAULT_ESTIMATE,
                execute_failures: HashMap::new(),
                receipts_fail: false,
                executed: vec![],
                deployed: true,
                feed: None,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_head(&self, head: u64) {
        self.inner().head = head;
    }

    /// Makes head reads fail until reset.
    pub fn fail_head(&self, fails: bool) {
        self.inner().head_fails = fails;
    }

    /// Adds a log to the history served by [`ChainClient::logs`].
    pub fn push_log(&self, log: Log) {
        self.inner().logs.push(log);
    }

    /// Makes log queries covering the block fail.
    pub fn fail_logs_at(&self, block_number: u64) {
        self.inner().logs_fail_at = Some(block_number);
    }

    /// Inclusive block ranges of all log queries so far.
    pub fn log_queries(&self) -> Vec<(u64, u64)> {
        self.inner().log_queries.clone()
    }

    /// Sets trades the contract reports as pending for the pair.
    pub fn set_queue(&self, pair_id: PairId, trade_ids: Vec<TradeId>) {
        self.inner().queues.insert(pair_id, trade_ids);
    }

    /// Pairs the queue was queried for so far.
    pub fn queue_queries(&self) -> Vec<PairId> {
        self.inner().queue_queries.clone()
    }

    pub fn set_estimate(&self, estimate: u64) {
        self.inner().estimate = estimate;
    }

    /// Makes execution of the pair fail with the message.
    pub fn fail_execute(&self, pair_id: PairId, message: impl Into<String>) {
        self.inner().execute_failures.insert(pair_id, message.into());
    }

    /// Makes executions mine with failed status.
    pub fn fail_receipts(&self, fails: bool) {
        self.inner().receipts_fail = fails;
    }

    /// Submitted executions with their gas limits.
    pub fn executed(&self) -> Vec<(PairId, u64)> {
        self.inner().executed.clone()
    }

    pub fn set_deployed(&self, deployed: bool) {
        self.inner().deployed = deployed;
    }

    /// Pushes a log to the live subscription, returns `false` if there is
    /// no subscriber.
    pub fn emit(&self, log: Log) -> bool {
        self.inner()
            .feed
            .as_ref()
            .is_some_and(|feed| feed.send(log).is_ok())
    }

    /// Indicates if a live subscription is open.
    pub fn subscribed(&self) -> bool {
        self.inner().feed.is_some()
    }

    /// Ends the live subscription.
    pub fn close_feed(&self) {
        self.inner().feed.take();
    }
}

impl ChainClient for MockChain {
    async fn block_number(&self) -> Result<u64, KeeperError> {
        let inner = self.inner();
        if inner.head_fails {
            return Err(KeeperError::Transport("head unavailable".to_string()));
        }
        Ok(inner.head)
    }

    async fn logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>, KeeperError> {
        let mut inner = self.inner();
        inner.log_queries.push((from_block, to_block));
        if inner
            .logs_fail_at
            .is_some_and(|block| (from_block..=to_block).contains(&block))
        {
            return Err(KeeperError::Transport("log query failed".to_string()));
        }
        Ok(inner
            .logs
            .iter()
            .filter(|log| {
                log.block_number
                    .is_some_and(|block| (from_block..=to_block).contains(&block))
            })
            .cloned()
            .collect())
    }

    async fn subscribe_logs(&self) -> Result<BoxStream<'static, Log>, KeeperError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner().feed = Some(tx);
        Ok(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|log| (log, rx))
        })
        .boxed())
    }

    async fn outstanding_trade_ids(&self, pair_id: PairId) -> Result<Vec<TradeId>, KeeperError> {
        let mut inner = self.inner();
        inner.queue_queries.push(pair_id);
        Ok(inner.queues.get(&pair_id).cloned().unwrap_or_default())
    }

    async fn estimate_execute(&self, pair_id: PairId) -> Result<u64, KeeperError> {
        let inner = self.inner();
        match inner.execute_failures.get(&pair_id) {
            Some(message) => Err(KeeperError::InvalidRequest(message.clone())),
            None => Ok(inner.estimate),
        }
    }

    async fn execute(
        &self,
        pair_id: PairId,
        gas_limit: u64,
    ) -> Result<ExecutionReceipt, KeeperError> {
        let mut inner = self.inner();
        if let Some(message) = inner.execute_failures.get(&pair_id) {
            return Err(KeeperError::InvalidRequest(message.clone()));
        }
        inner.executed.push((pair_id, gas_limit));
        Ok(ExecutionReceipt {
            tx_hash: B256::with_last_byte(inner.executed.len() as u8),
            block_number: Some(inner.head),
            gas_used: gas_limit,
            success: !inner.receipts_fail,
        })
    }

    async fn ensure_deployed(&self) -> Result<(), KeeperError> {
        if !self.inner().deployed {
            return Err(KeeperError::ContractNotDeployed(CORE));
        }
        Ok(())
    }
}

/// State store keeping the last saved snapshot in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    saved: Mutex<Option<State>>,
    saves: AtomicUsize,
    fails: AtomicBool,
}

impl MemoryStore {
    /// Store that loads the given state.
    pub fn with_state(state: State) -> Self {
        Self {
            saved: Mutex::new(Some(state)),
            saves: AtomicUsize::new(0),
            fails: AtomicBool::new(false),
        }
    }

    /// Makes saves fail with an I/O error.
    pub fn fail_saves(&self, fails: bool) {
        self.fails.store(fails, Ordering::Release);
    }

    /// Number of successful saves so far.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::Acquire)
    }

    /// Last saved state.
    pub fn saved(&self) -> Option<State> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<State, StoreError> {
        Ok(self.saved().unwrap_or_default())
    }

    fn save(&self, state: &State) -> Result<(), StoreError> {
        if self.fails.load(Ordering::Acquire) {
            return Err(io::Error::other("disk full").into());
        }
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
        self.saves.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Mined log of the event emitted at `address`.
pub fn log<E: SolEvent>(address: Address, block_number: u64, log_index: u64, event: &E) -> Log {
    Log {
        inner: primitives::Log {
            address,
            data: event.encode_log_data(),
        },
        block_number: Some(block_number),
        log_index: Some(log_index),
        transaction_hash: Some(B256::left_padding_from(&block_number.to_be_bytes())),
        ..Default::default()
    }
}

pub fn trade_created(
    trade_id: TradeId,
    token_in: Address,
    token_out: Address,
    amount_remaining: U256,
    last_sweet_spot: U256,
) -> StreamCore::TradeCreated {
    StreamCore::TradeCreated {
        tradeId: trade_id,
        user: Address::ZERO,
        tokenIn: token_in,
        tokenOut: token_out,
        amountIn: amount_remaining,
        amountRemaining: amount_remaining,
        minAmountOut: U256::ZERO,
        realisedAmountOut: U256::ZERO,
        lastSweetSpot: last_sweet_spot,
        isInstasettlable: false,
    }
}

pub fn stream_executed(trade_id: TradeId, last_sweet_spot: U256) -> StreamCore::TradeStreamExecuted {
    StreamCore::TradeStreamExecuted {
        tradeId: trade_id,
        amountIn: U256::ZERO,
        realisedAmountOut: U256::ZERO,
        lastSweetSpot: last_sweet_spot,
    }
}

pub fn trade_cancelled(
    trade_id: TradeId,
    amount_remaining: U256,
    realised_amount_out: U256,
) -> StreamCore::TradeCancelled {
    StreamCore::TradeCancelled {
        tradeId: trade_id,
        amountRemaining: amount_remaining,
        realisedAmountOut: realised_amount_out,
    }
}

pub fn trade_settled(trade_id: TradeId, total_amount_out: U256) -> StreamCore::TradeSettled {
    StreamCore::TradeSettled {
        tradeId: trade_id,
        settler: Address::ZERO,
        totalAmountIn: U256::ZERO,
        totalAmountOut: total_amount_out,
        totalFees: U256::ZERO,
    }
}
