//! Live log listener.
//!
//! Logs from the subscription are held in a [`ConfirmationGate`] until
//! buried under enough blocks, then projected and persisted. The head is
//! read on every log, and periodically while logs are pending, so a quiet
//! contract still gets its last logs applied.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use alloy::rpc::types::Log;
use futures::{StreamExt, stream::BoxStream};
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    chain::ChainClient,
    error::KeeperError,
    state::SharedState,
    store::StateStore,
    stream::{self, RawEvent},
    types::EventPosition,
};

/// Confirmation depth unless configured otherwise.
pub const DEFAULT_CONFIRMATIONS: u64 = 3;

/// Most logs held while waiting for confirmations.
const MAX_PENDING: usize = 10_000;

/// Head polling interval while logs are pending.
pub const RECHECK_INTERVAL: Duration = Duration::from_secs(2);

/// What happened to an offered log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Offer {
    /// Held until confirmed.
    Pending,
    /// Reorged out before confirmation, pending entry dropped.
    Retracted,
    /// Not positioned in a block, or reorged out without a pending entry.
    Ignored,
}

/// Holds live logs until they are `confirmations` blocks deep.
///
/// Pure logic, no async, the listener task drives it with head reads.
#[derive(Debug)]
pub struct ConfirmationGate {
    confirmations: u64,
    pending: BTreeMap<EventPosition, Log>,
}

impl ConfirmationGate {
    pub fn new(confirmations: u64) -> Self {
        Self {
            confirmations,
            pending: BTreeMap::new(),
        }
    }

    pub fn confirmations(&self) -> u64 {
        self.confirmations
    }

    /// Number of logs waiting for confirmations.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn offer(&mut self, log: Log) -> Offer {
        if log.block_number.is_none() {
            return Offer::Ignored;
        }
        let position = stream::position(&log);
        if log.removed {
            return match self.pending.remove(&position) {
                Some(_) => Offer::Retracted,
                None => {
                    warn!(?position, "Reorged log was already applied or never seen");
                    Offer::Ignored
                }
            };
        }
        self.pending.insert(position, log);
        if self.pending.len() > MAX_PENDING
            && let Some((position, _)) = self.pending.pop_first()
        {
            warn!(?position, "Pending buffer full, dropping oldest log");
        }
        Offer::Pending
    }

    /// Takes logs at least `confirmations` blocks below `head` and decodes
    /// them, ordered by position.
    pub fn release(&mut self, head: u64) -> Vec<RawEvent> {
        let Some(last_block) = head.checked_sub(self.confirmations) else {
            return vec![];
        };
        let rest = match last_block.checked_add(1) {
            Some(next_block) => self.pending.split_off(&EventPosition::new(next_block, 0)),
            None => BTreeMap::new(),
        };
        std::mem::replace(&mut self.pending, rest)
            .values()
            .filter_map(stream::decode)
            .collect()
    }
}

/// Subscribes to the core contract logs and starts the listener task.
///
/// The task applies confirmed events to the state until the subscription
/// ends, which is reported as [`KeeperError::FeedDisconnected`].
pub async fn start<C, S>(
    client: Arc<C>,
    state: SharedState<S>,
    confirmations: u64,
) -> Result<JoinHandle<Result<(), KeeperError>>, KeeperError>
where
    C: ChainClient,
    S: StateStore,
{
    let logs = client.subscribe_logs().await?;
    info!(confirmations, "Subscribed to live logs");

    let gate = ConfirmationGate::new(confirmations);
    Ok(tokio::spawn(run_listener(client, state, gate, logs)))
}

async fn run_listener<C, S>(
    client: Arc<C>,
    state: SharedState<S>,
    mut gate: ConfirmationGate,
    mut logs: BoxStream<'static, Log>,
) -> Result<(), KeeperError>
where
    C: ChainClient,
    S: StateStore,
{
    let mut recheck = tokio::time::interval(RECHECK_INTERVAL);
    recheck.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            log = logs.next() => {
                let Some(log) = log else { break };
                let offer = gate.offer(log);
                debug!(?offer, pending = gate.pending(), "Live log received");
            }
            _ = recheck.tick(), if gate.pending() > 0 => {}
        }

        let head = match client.block_number().await {
            Ok(head) => head,
            Err(err) => {
                warn!(%err, pending = gate.pending(), "Failed to read head, keeping logs pending");
                continue;
            }
        };
        let events = gate.release(head);
        if events.is_empty() {
            continue;
        }

        let changes = state
            .commit(|state| {
                events
                    .iter()
                    .filter_map(|event| state.apply_raw(event))
                    .collect::<Vec<_>>()
            })
            .await?;
        for change in &changes {
            info!(?change, head, "Live trade update");
        }
    }

    warn!(pending = gate.pending(), "Live log subscription ended");
    Err(KeeperError::FeedDisconnected)
}
