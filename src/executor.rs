//! Periodic execution of pairs with outstanding trades.
//!
//! Every tick walks all known pairs with bounded concurrency. A pair the
//! chain reports nothing queued for is reconciled locally, any other pair
//! with outstanding trades gets an `executeTrades` transaction. Failures
//! are logged and retried by the next tick, they never stop the executor.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use fastnum::udec64;
use futures::{StreamExt, stream};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::{
    chain::{ChainClient, ExecutionReceipt},
    error::KeeperError,
    num::GasMultiplier,
    state::{Pair, SharedState},
    store::StateStore,
    types::PairId,
};

/// Failure messages expected during normal operation, e.g. a pair drained
/// by another keeper between the queue check and the transaction.
pub const BENIGN_PATTERNS: [&str; 4] = ["empty", "no trades", "already", "revert"];

/// Indicates if the failure message matches any of [`BENIGN_PATTERNS`],
/// ignoring case.
pub fn is_benign(message: &str) -> bool {
    let message = message.to_lowercase();
    BENIGN_PATTERNS.iter().any(|p| message.contains(p))
}

#[derive(Clone, Debug)]
pub struct ExecutorConfig {
    /// Pairs processed concurrently within a tick.
    pub max_in_flight: usize,
    pub gas_multiplier: GasMultiplier,
    pub tick_interval: Duration,
    /// Delay before fully completed pairs are dropped, `None` keeps them.
    pub prune_after: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 4,
            gas_multiplier: GasMultiplier::new(udec64!(1.2)),
            tick_interval: Duration::from_secs(30),
            prune_after: Some(Duration::from_secs(3600)),
        }
    }
}

/// Result of a single pair pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PairOutcome {
    /// No outstanding trades, nothing done.
    Idle,
    /// Chain has nothing queued, local trades marked completed.
    Reconciled { completed: usize },
    Executed(ExecutionReceipt),
    /// Expected failure, retried next tick.
    Benign(String),
    /// Unexpected failure, retried next tick.
    Failed(String),
}

impl PairOutcome {
    fn from_error(err: KeeperError) -> Self {
        let message = err.to_string();
        if is_benign(&message) {
            Self::Benign(message)
        } else {
            Self::Failed(message)
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick requested while another one was running.
    pub skipped: bool,
    pub idle: usize,
    pub reconciled: usize,
    pub executed: usize,
    pub benign: usize,
    pub failed: usize,
    pub pruned: usize,
    /// Saves that failed, the state is saved again by a later step.
    pub unsaved: usize,
}

impl TickReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }

    fn record(&mut self, outcome: &PairOutcome) {
        match outcome {
            PairOutcome::Idle => self.idle += 1,
            PairOutcome::Reconciled { .. } => self.reconciled += 1,
            PairOutcome::Executed(_) => self.executed += 1,
            PairOutcome::Benign(_) => self.benign += 1,
            PairOutcome::Failed(_) => self.failed += 1,
        }
    }
}

#[derive(derive_more::Debug)]
pub struct Executor<C, S> {
    #[debug(skip)]
    client: Arc<C>,
    #[debug(skip)]
    state: SharedState<S>,
    config: ExecutorConfig,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag when the tick ends, whatever way it ends.
struct TickGuard<'a>(&'a AtomicBool);

impl<'a> TickGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<C: ChainClient, S: StateStore> Executor<C, S> {
    pub fn new(client: Arc<C>, state: SharedState<S>, config: ExecutorConfig) -> Self {
        Self {
            client,
            state,
            config,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Ticks at the configured interval, forever.
    ///
    /// Ticks missed while a slow one was running are skipped rather than
    /// fired in a burst.
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            tick_interval = ?self.config.tick_interval,
            max_in_flight = self.config.max_in_flight,
            gas_multiplier = %self.config.gas_multiplier,
            "Executor started"
        );
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    /// Processes every known pair once, then prunes long completed pairs.
    ///
    /// Returns immediately with [`TickReport::skipped`] set if another tick
    /// is still running. Failures, persistence included, are logged and
    /// left for the next tick.
    pub async fn tick(&self) -> TickReport {
        let Some(_guard) = TickGuard::acquire(&self.in_flight) else {
            debug!("Previous tick still running, skipping");
            return TickReport::skipped();
        };

        let pair_ids = self
            .state
            .read(|state| {
                let mut ids: Vec<_> = state.pairs().keys().copied().collect();
                ids.sort();
                ids
            })
            .await;

        let outcomes: Vec<_> = stream::iter(pair_ids)
            .map(|pair_id| self.execute_pair(pair_id))
            .buffer_unordered(self.config.max_in_flight.max(1))
            .collect()
            .await;

        let mut report = TickReport::default();
        for (outcome, saved) in outcomes {
            report.record(&outcome);
            if !saved {
                report.unsaved += 1;
            }
        }

        if let Some(after) = self.config.prune_after {
            let now = unix_now();
            let pruned = self
                .state
                .mutate(|state| state.prune_settled(now, after.as_secs()))
                .await;
            if pruned.changed()
                && let Err(err) = self.state.persist().await
            {
                error!(%err, "Failed to persist pruned state");
                report.unsaved += 1;
            }
            for trade_id in &pruned.expired {
                debug!(%trade_id, "Expired unassigned trade");
            }
            for pair_id in &pruned.pruned {
                debug!(%pair_id, "Pruned completed pair");
            }
            report.pruned = pruned.pruned.len();
        }

        info!(
            idle = report.idle,
            reconciled = report.reconciled,
            executed = report.executed,
            benign = report.benign,
            failed = report.failed,
            pruned = report.pruned,
            unsaved = report.unsaved,
            "Tick completed"
        );
        report
    }

    /// Runs a single pair pass and persists the state if anything was
    /// attempted, returns `false` alongside the outcome if saving failed.
    pub async fn execute_pair(&self, pair_id: PairId) -> (PairOutcome, bool) {
        let outcome = self.attempt(pair_id).await;
        match &outcome {
            // Nothing changed, no need to save
            PairOutcome::Idle => return (outcome, true),
            PairOutcome::Reconciled { completed } => {
                warn!(%pair_id, completed, "Chain queue empty, local trades marked completed")
            }
            PairOutcome::Executed(receipt) => info!(
                %pair_id,
                tx_hash = %receipt.tx_hash,
                block_number = ?receipt.block_number,
                gas_used = receipt.gas_used,
                "Pair executed"
            ),
            PairOutcome::Benign(reason) => info!(%pair_id, %reason, "Pair execution skipped"),
            PairOutcome::Failed(reason) => error!(%pair_id, %reason, "Pair execution failed"),
        }
        match self.state.persist().await {
            Ok(()) => (outcome, true),
            Err(err) => {
                error!(%pair_id, %err, "Failed to persist state");
                (outcome, false)
            }
        }
    }

    async fn attempt(&self, pair_id: PairId) -> PairOutcome {
        let local = self
            .state
            .read(|state| state.pair(&pair_id).map(Pair::outstanding_trade_ids))
            .await
            .unwrap_or_default();
        if local.is_empty() {
            return PairOutcome::Idle;
        }

        let queued = match self.client.outstanding_trade_ids(pair_id).await {
            Ok(queued) => queued,
            Err(err) => return PairOutcome::from_error(err),
        };
        if queued.is_empty() {
            let completed = self
                .state
                .mutate(|state| {
                    local
                        .iter()
                        .filter(|trade_id| state.mark_completed(&pair_id, trade_id))
                        .count()
                })
                .await;
            return PairOutcome::Reconciled { completed };
        }

        let estimate = match self.client.estimate_execute(pair_id).await {
            Ok(estimate) => estimate,
            Err(err) => return PairOutcome::from_error(err),
        };
        let gas_limit = self.config.gas_multiplier.apply(estimate);
        debug!(%pair_id, queued = queued.len(), estimate, gas_limit, "Executing pair");

        match self.client.execute(pair_id, gas_limit).await {
            Ok(receipt) if receipt.success => PairOutcome::Executed(receipt),
            Ok(receipt) => PairOutcome::from_error(KeeperError::Reverted(format!(
                "transaction {} failed",
                receipt.tx_hash
            ))),
            Err(err) => PairOutcome::from_error(err),
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        state::State,
        testing::{MemoryStore, MockChain},
    };

    #[test]
    fn test_is_benign() {
        assert!(is_benign("execution reverted: No trades to execute"));
        assert!(is_benign("Queue EMPTY"));
        assert!(is_benign("trade already executed"));
        assert!(!is_benign("insufficient funds for gas"));
        assert!(!is_benign("transport error: connection refused"));
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(
            PairOutcome::from_error(KeeperError::Reverted("0x".to_string())),
            PairOutcome::Benign("transaction reverted: 0x".to_string())
        );
        assert!(matches!(
            PairOutcome::from_error(KeeperError::OutOfGas),
            PairOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn test_overlapping_tick_is_skipped() {
        let state = SharedState::new(State::new(), MemoryStore::default());
        let executor = Executor::new(
            Arc::new(MockChain::new(0)),
            state.clone(),
            ExecutorConfig::default(),
        );

        executor.in_flight.store(true, Ordering::Release);
        let report = executor.tick().await;
        assert!(report.skipped);
        assert_eq!(state.store().saves(), 0);

        executor.in_flight.store(false, Ordering::Release);
        let report = executor.tick().await;
        assert!(!report.skipped);
        assert!(!executor.in_flight.load(Ordering::Acquire));
    }
}
