use std::{sync::Arc, time::Duration};

use alloy::primitives::{Address, U256, address};
use fastnum::udec64;
use stream_keeper::{
    chain::ChainClient,
    error::KeeperError,
    executor::{Executor, ExecutorConfig},
    listener,
    num::GasMultiplier,
    scan::ColdScanner,
    service,
    state::{SharedState, State, TradeUpdate},
    testing::{self, CORE, MemoryStore, MockChain},
    types::{EventPosition, PairId, pair_id},
};
use tokio_test::{assert_err, assert_ok};

const TOKEN_A: Address = address!("0xa000000000000000000000000000000000000001");
const TOKEN_B: Address = address!("0xb000000000000000000000000000000000000002");

fn created_log(trade_id: u64, block_number: u64, log_index: u64) -> alloy::rpc::types::Log {
    testing::log(
        CORE,
        block_number,
        log_index,
        &testing::trade_created(
            U256::from(trade_id),
            TOKEN_A,
            TOKEN_B,
            U256::from(1000),
            U256::from(5),
        ),
    )
}

fn executed_log(trade_id: u64, block_number: u64, sweet_spot: u64) -> alloy::rpc::types::Log {
    testing::log(
        CORE,
        block_number,
        0,
        &testing::stream_executed(U256::from(trade_id), U256::from(sweet_spot)),
    )
}

/// State holding the outstanding trades in the test pair.
fn outstanding_state(trade_ids: &[u64]) -> (PairId, SharedState<MemoryStore>) {
    let pair = pair_id(TOKEN_A, TOKEN_B);
    let mut state = State::new();
    for id in trade_ids {
        state.upsert_trade(TradeUpdate {
            pair_id: Some(pair),
            last_sweet_spot: Some(U256::from(5)),
            amount_remaining: Some(U256::from(1000)),
            position: Some(EventPosition::new(1, *id)),
            ..TradeUpdate::new(U256::from(*id))
        });
    }
    (pair, SharedState::new(state, MemoryStore::default()))
}

fn executor(
    chain: &Arc<MockChain>,
    state: &SharedState<MemoryStore>,
) -> Executor<MockChain, MemoryStore> {
    Executor::new(
        chain.clone(),
        state.clone(),
        ExecutorConfig {
            max_in_flight: 2,
            gas_multiplier: GasMultiplier::new(udec64!(1.2)),
            tick_interval: Duration::from_secs(1),
            prune_after: None,
        },
    )
}

/// Polls the condition until it holds, letting spawned tasks progress.
async fn eventually<F: AsyncFn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

#[tokio::test]
async fn test_cold_scan_commits_every_chunk() {
    let chain = Arc::new(MockChain::new(6000));
    chain.push_log(created_log(1, 1500, 0));
    chain.push_log(created_log(2, 3200, 1));
    chain.push_log(executed_log(1, 5500, 0));
    let state = SharedState::new(State::new(), MemoryStore::default());

    let scanner = ColdScanner::new(chain.clone(), state.clone(), 2000);
    let summary = assert_ok!(scanner.scan(1000).await);

    assert_eq!(summary.start, Some(1000));
    assert_eq!(summary.chunks, 3);
    assert_eq!(summary.events, 3);
    assert_eq!(
        chain.log_queries(),
        vec![(1000, 2999), (3000, 4999), (5000, 6000)]
    );
    assert_eq!(state.store().saves(), 3);

    let saved = state.store().saved().unwrap();
    assert_eq!(saved.last_scanned_block(), Some(6001));
    assert!(saved.trade(&U256::from(1)).unwrap().completed());
    assert!(saved.trade(&U256::from(2)).unwrap().is_outstanding());
}

#[tokio::test]
async fn test_cold_scan_resumes_from_cursor() {
    let chain = Arc::new(MockChain::new(6000));
    let mut initial = State::new();
    initial.commit_cursor(5000);
    let state = SharedState::new(initial, MemoryStore::default());

    let scanner = ColdScanner::new(chain.clone(), state.clone(), 2000);
    assert_ok!(scanner.scan(1000).await);
    assert_eq!(chain.log_queries(), vec![(5000, 6000)]);

    // Caught up, nothing to do
    let summary = assert_ok!(scanner.scan(1000).await);
    assert_eq!(summary.start, None);
    assert_eq!(chain.log_queries().len(), 1);
    assert_eq!(state.store().saves(), 1);
}

#[tokio::test]
async fn test_cold_scan_aborts_on_chunk_failure() {
    let chain = Arc::new(MockChain::new(6000));
    chain.fail_logs_at(3500);
    let state = SharedState::new(State::new(), MemoryStore::default());

    let scanner = ColdScanner::new(chain.clone(), state.clone(), 2000);
    let err = assert_err!(scanner.scan(1000).await);

    assert!(err.is_transient());
    assert_eq!(state.store().saves(), 1);
    assert_eq!(state.snapshot().await.last_scanned_block(), Some(3000));
}

#[tokio::test]
async fn test_executor_reconciles_drained_queue() {
    let chain = Arc::new(MockChain::new(100));
    let (pair, state) = outstanding_state(&[1, 2]);

    let report = executor(&chain, &state).tick().await;

    assert_eq!(report.reconciled, 1);
    assert!(chain.executed().is_empty());
    let saved = state.store().saved().unwrap();
    assert!(saved.outstanding_pair_ids().is_empty());
    assert!(saved.pair(&pair).unwrap().trades().values().all(|t| t.completed()));
}

#[tokio::test]
async fn test_executor_executes_queued_pair() {
    let chain = Arc::new(MockChain::new(100));
    let (pair, state) = outstanding_state(&[1]);
    chain.set_queue(pair, vec![U256::from(1)]);
    chain.set_estimate(100_000);

    let report = executor(&chain, &state).tick().await;

    assert_eq!(report.executed, 1);
    assert_eq!(chain.executed(), vec![(pair, 120_000)]);
    assert_eq!(state.store().saves(), 1);
    // Completion is only learnt from events
    assert_eq!(state.snapshot().await.outstanding_pair_ids(), vec![pair]);
}

#[tokio::test]
async fn test_executor_benign_failure_is_retried() {
    let chain = Arc::new(MockChain::new(100));
    let (pair, state) = outstanding_state(&[1]);
    chain.set_queue(pair, vec![U256::from(1)]);
    chain.fail_execute(pair, "execution reverted: Already executed");
    let executor = executor(&chain, &state);

    let report = executor.tick().await;
    assert_eq!(report.benign, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(state.store().saves(), 1);
    assert_eq!(state.snapshot().await.outstanding_pair_ids(), vec![pair]);

    let report = executor.tick().await;
    assert_eq!(report.benign, 1);
    assert_eq!(chain.queue_queries(), vec![pair, pair]);
}

#[tokio::test]
async fn test_executor_unexpected_failure_is_reported() {
    let chain = Arc::new(MockChain::new(100));
    let (pair, state) = outstanding_state(&[1]);
    chain.set_queue(pair, vec![U256::from(1)]);
    chain.fail_execute(pair, "insufficient funds for gas");

    let report = executor(&chain, &state).tick().await;
    assert_eq!(report.failed, 1);
    assert_eq!(state.snapshot().await.outstanding_pair_ids(), vec![pair]);
}

#[tokio::test]
async fn test_executor_failed_receipt_is_benign() {
    let chain = Arc::new(MockChain::new(100));
    let (pair, state) = outstanding_state(&[1]);
    chain.set_queue(pair, vec![U256::from(1)]);
    chain.fail_receipts(true);

    let report = executor(&chain, &state).tick().await;
    assert_eq!(report.benign, 1);
    assert_eq!(chain.executed().len(), 1);
}

#[tokio::test]
async fn test_executor_survives_failed_saves() {
    let chain = Arc::new(MockChain::new(100));
    let (pair, state) = outstanding_state(&[1]);
    chain.set_queue(pair, vec![U256::from(1)]);
    state.store().fail_saves(true);
    let executor = executor(&chain, &state);

    let report = executor.tick().await;
    assert_eq!(report.executed, 1);
    assert_eq!(report.unsaved, 1);
    assert!(state.store().saved().is_none());

    state.store().fail_saves(false);
    let report = executor.tick().await;
    assert_eq!(report.executed, 1);
    assert_eq!(report.unsaved, 0);
    assert_eq!(chain.executed().len(), 2);
    assert_eq!(state.store().saves(), 1);
}

#[tokio::test]
async fn test_executor_skips_completed_pairs() {
    let chain = Arc::new(MockChain::new(100));
    let (pair, state) = outstanding_state(&[1]);
    state
        .mutate(|s| s.mark_completed(&pair, &U256::from(1)))
        .await;

    let report = executor(&chain, &state).tick().await;
    assert_eq!(report.idle, 1);
    assert!(chain.queue_queries().is_empty());
    assert_eq!(state.store().saves(), 0);
}

#[tokio::test]
async fn test_executor_prunes_completed_pairs() {
    let chain = Arc::new(MockChain::new(100));
    let (pair, state) = outstanding_state(&[1]);
    let executor = Executor::new(
        chain.clone(),
        state.clone(),
        ExecutorConfig {
            prune_after: Some(Duration::ZERO),
            ..ExecutorConfig::default()
        },
    );

    // Reconciled first, stamped by the same tick
    let report = executor.tick().await;
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.pruned, 0);
    assert!(state.snapshot().await.pair(&pair).unwrap().settled_since().is_some());

    let report = executor.tick().await;
    assert_eq!(report.pruned, 1);
    assert!(state.store().saved().unwrap().pairs().is_empty());
}

#[tokio::test]
async fn test_listener_waits_for_confirmations() {
    let chain = Arc::new(MockChain::new(10));
    let state = SharedState::new(State::new(), MemoryStore::default());
    let _handle = assert_ok!(listener::start(chain.clone(), state.clone(), 3).await);

    assert!(chain.emit(created_log(1, 10, 0)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(state.read(|s| s.trade(&U256::from(1)).is_none()).await);
    assert_eq!(state.store().saves(), 0);

    // Re-examined on the next notification
    chain.set_head(13);
    assert!(chain.emit(created_log(2, 13, 0)));
    assert!(eventually(async || state.read(|s| s.trade(&U256::from(1)).is_some()).await).await);
    assert!(state.read(|s| s.trade(&U256::from(2)).is_none()).await);
    assert_eq!(state.store().saves(), 1);
}

#[tokio::test]
async fn test_listener_drops_reorged_logs() {
    let chain = Arc::new(MockChain::new(10));
    let state = SharedState::new(State::new(), MemoryStore::default());
    let _handle = assert_ok!(listener::start(chain.clone(), state.clone(), 3).await);

    chain.emit(created_log(1, 10, 0));
    let mut removed = created_log(1, 10, 0);
    removed.removed = true;
    chain.emit(removed);
    tokio::time::sleep(Duration::from_millis(50)).await;

    chain.set_head(20);
    chain.emit(created_log(2, 11, 0));
    assert!(eventually(async || state.read(|s| s.trade(&U256::from(2)).is_some()).await).await);
    assert!(state.read(|s| s.trade(&U256::from(1)).is_none()).await);
}

#[tokio::test]
async fn test_listener_keeps_logs_on_head_failure() {
    let chain = Arc::new(MockChain::new(100));
    let state = SharedState::new(State::new(), MemoryStore::default());
    let _handle = assert_ok!(listener::start(chain.clone(), state.clone(), 3).await);

    chain.fail_head(true);
    chain.emit(created_log(1, 10, 0));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(state.read(|s| s.trade(&U256::from(1)).is_none()).await);

    chain.fail_head(false);
    chain.emit(created_log(2, 11, 0));
    assert!(
        eventually(async || state
            .read(|s| s.trade(&U256::from(1)).is_some() && s.trade(&U256::from(2)).is_some())
            .await)
        .await
    );
}

#[tokio::test]
async fn test_listener_reports_disconnect() {
    let chain = Arc::new(MockChain::new(10));
    let state = SharedState::new(State::new(), MemoryStore::default());
    let handle = assert_ok!(listener::start(chain.clone(), state.clone(), 3).await);

    chain.close_feed();
    let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
    let result = assert_ok!(assert_ok!(result));
    assert!(matches!(result, Err(KeeperError::FeedDisconnected)));
}

#[tokio::test(start_paused = true)]
async fn test_listener_releases_logs_without_new_activity() {
    let chain = Arc::new(MockChain::new(10));
    let state = SharedState::new(State::new(), MemoryStore::default());
    let _handle = assert_ok!(listener::start(chain.clone(), state.clone(), 3).await);

    assert!(chain.emit(created_log(1, 10, 0)));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(state.read(|s| s.trade(&U256::from(1)).is_none()).await);

    // No further logs, buried by new blocks only
    chain.set_head(13);
    tokio::time::sleep(listener::RECHECK_INTERVAL * 2).await;
    assert!(state.read(|s| s.trade(&U256::from(1)).is_some()).await);
    assert_eq!(state.store().saves(), 1);
}

#[tokio::test]
async fn test_missing_contract_is_reported() {
    let chain = MockChain::new(10);
    assert_ok!(chain.ensure_deployed().await);

    chain.set_deployed(false);
    let err = assert_err!(chain.ensure_deployed().await);
    assert!(matches!(err, KeeperError::ContractNotDeployed(address) if address == CORE));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_service_persists_after_disconnect() {
    let chain = Arc::new(MockChain::new(10));
    let state = SharedState::new(State::new(), MemoryStore::default());
    let disconnect = async {
        assert!(eventually(async || chain.subscribed()).await);
        chain.close_feed();
    };

    let (result, ()) = tokio::join!(
        service::run(
            chain.clone(),
            state.clone(),
            3,
            ExecutorConfig::default(),
            std::future::pending::<()>(),
        ),
        disconnect,
    );

    assert!(matches!(result, Err(KeeperError::FeedDisconnected)));
    assert_eq!(state.store().saves(), 1);
}

#[tokio::test]
async fn test_service_persists_on_shutdown() {
    let chain = Arc::new(MockChain::new(10));
    let state = SharedState::new(State::new(), MemoryStore::default());

    let result = service::run(
        chain.clone(),
        state.clone(),
        3,
        ExecutorConfig::default(),
        tokio::time::sleep(Duration::from_millis(20)),
    )
    .await;

    assert_ok!(result);
    assert_eq!(state.store().saves(), 1);
    assert!(chain.subscribed());
}
