//! Trade state tracking.
//!
//! [`State`] is the materialized view of every trade discovered through the
//! core contract events, grouped into [`Pair`]s, along with the cold scan
//! cursor.
//!
//! The view is mutated by [`State::apply_event`] for both historical and
//! live events, and by the executor marking trades completed when the chain
//! reports nothing left to do. [`SharedState`] serializes these mutations and
//! writes the whole view through the [`crate::store::StateStore`] after each
//! logical step.

mod pair;
mod projector;
mod trade;

use std::{
    collections::{HashMap, hash_map},
    sync::Arc,
};

use tokio::sync::Mutex;

use crate::{
    store::{StateStore, StoreError},
    types::{PairId, TradeId},
};

// Public re-exports
pub use pair::*;
pub use projector::*;
pub use trade::*;

/// Materialized view of the protocol trades.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct State {
    last_scanned_block: Option<u64>,
    pairs: HashMap<PairId, Pair>,
    unassigned: HashMap<TradeId, Trade>,
    unassigned_since: HashMap<TradeId, u64>,
    trade_pairs: HashMap<TradeId, PairId>,
}

/// Outcome of a single pruning pass.
#[derive(Clone, Debug, Default)]
pub struct PruneReport {
    /// Pairs newly observed with all trades completed.
    pub stamped: usize,

    /// Pairs that became outstanding again.
    pub revived: usize,

    /// Pairs removed from the view.
    pub pruned: Vec<PairId>,

    /// Unassigned trades whose creation never showed up, removed from the
    /// view.
    pub expired: Vec<TradeId>,
}

impl PruneReport {
    pub fn changed(&self) -> bool {
        self.stamped > 0 || self.revived > 0 || !self.pruned.is_empty() || !self.expired.is_empty()
    }
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        last_scanned_block: Option<u64>,
        pairs: HashMap<PairId, Pair>,
        unassigned: HashMap<TradeId, Trade>,
        unassigned_since: HashMap<TradeId, u64>,
    ) -> Self {
        let trade_pairs = pairs
            .values()
            .flat_map(|pair| pair.trade_ids.iter().map(|id| (*id, pair.id)))
            .collect();
        Self {
            last_scanned_block,
            pairs,
            unassigned,
            unassigned_since,
            trade_pairs,
        }
    }

    /// Next block the cold scan resumes from, if any chunk was committed.
    pub fn last_scanned_block(&self) -> Option<u64> {
        self.last_scanned_block
    }

    /// Commits the cold scan cursor.
    pub fn commit_cursor(&mut self, next_block: u64) {
        self.last_scanned_block = Some(next_block);
    }

    pub fn pairs(&self) -> &HashMap<PairId, Pair> {
        &self.pairs
    }

    pub fn pair(&self, pair_id: &PairId) -> Option<&Pair> {
        self.pairs.get(pair_id)
    }

    /// Trades observed before their creation event, pair unknown yet.
    pub fn unassigned(&self) -> &HashMap<TradeId, Trade> {
        &self.unassigned
    }

    /// Unix timestamp the unassigned trade was first seen by the pruning
    /// pass.
    pub fn unassigned_since(&self, trade_id: &TradeId) -> Option<u64> {
        self.unassigned_since.get(trade_id).copied()
    }

    /// Pair the trade belongs to, if known.
    pub fn pair_of(&self, trade_id: &TradeId) -> Option<PairId> {
        self.trade_pairs.get(trade_id).copied()
    }

    pub fn trade(&self, trade_id: &TradeId) -> Option<&Trade> {
        match self.trade_pairs.get(trade_id) {
            Some(pair_id) => self.pairs.get(pair_id).and_then(|p| p.trade(trade_id)),
            None => self.unassigned.get(trade_id),
        }
    }

    /// Merges provided trade fields into the tracked trade, creating the
    /// trade and its pair if absent.
    ///
    /// Trades with unknown pair are held aside until an update carrying the
    /// pair arrives. Returns `true` if the view changed.
    pub fn upsert_trade(&mut self, update: TradeUpdate) -> bool {
        let trade_id = update.trade_id;
        let Some(pair_id) = self.pair_of(&trade_id).or(update.pair_id) else {
            return self
                .unassigned
                .entry(trade_id)
                .or_insert_with(|| Trade::new(trade_id))
                .merge(&update);
        };

        let adopted = self.unassigned.remove(&trade_id);
        self.unassigned_since.remove(&trade_id);
        let pair = self
            .pairs
            .entry(pair_id)
            .or_insert_with(|| Pair::new(pair_id));
        let is_new = adopted.is_some() || !pair.trades.contains_key(&trade_id);
        let trade = pair.trade_entry(adopted.unwrap_or_else(|| Trade::new(trade_id)));
        trade.pair_id = Some(pair_id);
        let changed = trade.merge(&update);
        if trade.is_outstanding() {
            pair.settled_since = None;
        }
        self.trade_pairs.insert(trade_id, pair_id);
        changed || is_new
    }

    /// Marks the trade completed, returns `true` if it was outstanding.
    pub fn mark_completed(&mut self, pair_id: &PairId, trade_id: &TradeId) -> bool {
        self.pairs
            .get_mut(pair_id)
            .and_then(|pair| pair.trade_mut(trade_id))
            .is_some_and(|trade| !std::mem::replace(&mut trade.completed, true))
    }

    /// IDs of pairs with at least one non-completed trade, sorted.
    pub fn outstanding_pair_ids(&self) -> Vec<PairId> {
        let mut ids: Vec<_> = self
            .pairs
            .values()
            .filter(|pair| pair.is_outstanding())
            .map(Pair::id)
            .collect();
        ids.sort();
        ids
    }

    /// Time-delayed cleanup of fully completed pairs.
    ///
    /// A pair seen with all trades completed is stamped with `now` first and
    /// removed only once it stayed that way for `after` seconds, so trades
    /// briefly reappearing keep their history.
    ///
    /// Unassigned trades are expired on the same schedule. Late events of
    /// trades whose pair was already pruned land there, and their creation
    /// never comes again.
    pub fn prune_settled(&mut self, now: u64, after: u64) -> PruneReport {
        let mut report = PruneReport::default();
        for pair in self.pairs.values_mut() {
            if pair.is_outstanding() {
                if pair.settled_since.take().is_some() {
                    report.revived += 1;
                }
                continue;
            }
            match pair.settled_since {
                None => {
                    pair.settled_since = Some(now);
                    report.stamped += 1;
                }
                Some(since) if now.saturating_sub(since) >= after => report.pruned.push(pair.id),
                Some(_) => {}
            }
        }
        report.pruned.sort();
        for pair_id in &report.pruned {
            if let Some(pair) = self.pairs.remove(pair_id) {
                for trade_id in &pair.trade_ids {
                    self.trade_pairs.remove(trade_id);
                }
            }
        }

        self.unassigned_since
            .retain(|trade_id, _| self.unassigned.contains_key(trade_id));
        for trade_id in self.unassigned.keys() {
            match self.unassigned_since.entry(*trade_id) {
                hash_map::Entry::Vacant(e) => {
                    e.insert(now);
                    report.stamped += 1;
                }
                hash_map::Entry::Occupied(e) if now.saturating_sub(*e.get()) >= after => {
                    report.expired.push(*trade_id)
                }
                hash_map::Entry::Occupied(_) => {}
            }
        }
        report.expired.sort();
        for trade_id in &report.expired {
            self.unassigned.remove(trade_id);
            self.unassigned_since.remove(trade_id);
        }
        report
    }
}

/// State shared between the keeper components.
///
/// All mutations are serialized by a single lock, and persisted while
/// still holding it, so the store always receives a consistent view.
#[derive(Debug)]
pub struct SharedState<S> {
    state: Arc<Mutex<State>>,
    store: Arc<S>,
}

impl<S> Clone for SharedState<S> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            store: self.store.clone(),
        }
    }
}

impl<S: StateStore> SharedState<S> {
    pub fn new(state: State, store: S) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            store: Arc::new(store),
        }
    }

    /// Loads the state from the store.
    pub fn load(store: S) -> Result<Self, StoreError> {
        let state = store.load()?;
        Ok(Self::new(state, store))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        f(&*self.state.lock().await)
    }

    /// Mutates the state without persisting it.
    pub async fn mutate<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        f(&mut *self.state.lock().await)
    }

    /// Mutates the state and persists the result.
    pub async fn commit<R>(&self, f: impl FnOnce(&mut State) -> R) -> Result<R, StoreError> {
        let mut state = self.state.lock().await;
        let result = f(&mut state);
        self.store.save(&state)?;
        Ok(result)
    }

    /// Persists the current state.
    pub async fn persist(&self) -> Result<(), StoreError> {
        let state = self.state.lock().await;
        self.store.save(&state)
    }

    pub async fn snapshot(&self) -> State {
        self.state.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{U256, address};

    use super::*;
    use crate::types::{EventPosition, pair_id};

    fn created(trade_id: u64, pair: PairId, sweet_spot: u64) -> TradeUpdate {
        TradeUpdate {
            pair_id: Some(pair),
            last_sweet_spot: Some(U256::from(sweet_spot)),
            amount_remaining: Some(U256::from(1000)),
            position: Some(EventPosition::new(trade_id, 0)),
            ..TradeUpdate::new(U256::from(trade_id))
        }
    }

    fn test_pair() -> PairId {
        pair_id(
            address!("0x1000000000000000000000000000000000000001"),
            address!("0x2000000000000000000000000000000000000002"),
        )
    }

    #[test]
    fn test_upsert_preserves_discovery_order() {
        let pair = test_pair();
        let mut state = State::new();
        for id in [3, 1, 2, 1] {
            state.upsert_trade(created(id, pair, 5));
        }
        let ids = state.pair(&pair).unwrap().trade_ids().to_vec();
        assert_eq!(ids, vec![U256::from(3), U256::from(1), U256::from(2)]);
        assert_eq!(state.pair_of(&U256::from(2)), Some(pair));
    }

    #[test]
    fn test_unassigned_trade_adopted_by_pair() {
        let pair = test_pair();
        let mut state = State::new();
        assert!(state.upsert_trade(TradeUpdate {
            last_sweet_spot: Some(U256::from(2)),
            position: Some(EventPosition::new(20, 0)),
            ..TradeUpdate::new(U256::from(7))
        }));
        assert!(state.pairs().is_empty());
        assert!(state.unassigned().contains_key(&U256::from(7)));

        assert!(state.upsert_trade(created(7, pair, 5)));
        assert!(state.unassigned().is_empty());
        let trade = state.trade(&U256::from(7)).unwrap();
        assert_eq!(trade.pair_id(), Some(pair));
        // Creation is older than the progress already observed
        assert_eq!(trade.last_sweet_spot(), Some(U256::from(2)));
        assert_eq!(trade.amount_remaining(), Some(U256::from(1000)));
    }

    #[test]
    fn test_mark_completed_and_outstanding() {
        let pair = test_pair();
        let mut state = State::new();
        state.upsert_trade(created(1, pair, 5));
        state.upsert_trade(created(2, pair, 5));
        assert_eq!(state.outstanding_pair_ids(), vec![pair]);

        assert!(state.mark_completed(&pair, &U256::from(1)));
        assert!(!state.mark_completed(&pair, &U256::from(1)));
        assert_eq!(state.outstanding_pair_ids(), vec![pair]);

        assert!(state.mark_completed(&pair, &U256::from(2)));
        assert!(state.outstanding_pair_ids().is_empty());
        assert!(!state.mark_completed(&pair, &U256::from(99)));
    }

    #[test]
    fn test_prune_settled_is_delayed() {
        let pair = test_pair();
        let mut state = State::new();
        state.upsert_trade(created(1, pair, 5));

        assert!(!state.prune_settled(100, 60).changed());

        state.mark_completed(&pair, &U256::from(1));
        let report = state.prune_settled(100, 60);
        assert_eq!(report.stamped, 1);
        assert!(report.pruned.is_empty());
        assert_eq!(state.pair(&pair).unwrap().settled_since(), Some(100));

        assert!(!state.prune_settled(159, 60).changed());

        let report = state.prune_settled(160, 60);
        assert_eq!(report.pruned, vec![pair]);
        assert!(state.pairs().is_empty());
        assert_eq!(state.pair_of(&U256::from(1)), None);
    }

    #[test]
    fn test_prune_settled_expires_late_events_of_pruned_pairs() {
        let pair = test_pair();
        let mut state = State::new();
        state.upsert_trade(created(1, pair, 5));
        state.mark_completed(&pair, &U256::from(1));
        state.prune_settled(100, 0);
        assert_eq!(state.prune_settled(100, 0).pruned, vec![pair]);

        // Settlement observed after the pair is gone
        assert!(state.upsert_trade(TradeUpdate {
            realised_amount_out: Some(U256::from(10)),
            completed: true,
            position: Some(EventPosition::new(50, 0)),
            ..TradeUpdate::new(U256::from(1))
        }));
        assert_eq!(state.unassigned().len(), 1);

        let report = state.prune_settled(200, 60);
        assert_eq!(report.stamped, 1);
        assert!(report.expired.is_empty());
        assert_eq!(state.unassigned_since(&U256::from(1)), Some(200));

        assert!(!state.prune_settled(259, 60).changed());
        let report = state.prune_settled(260, 60);
        assert_eq!(report.expired, vec![U256::from(1)]);
        assert!(state.unassigned().is_empty());
        assert_eq!(state.unassigned_since(&U256::from(1)), None);
        assert!(!state.prune_settled(400, 60).changed());
    }

    #[test]
    fn test_adopted_trade_clears_unassigned_stamp() {
        let pair = test_pair();
        let mut state = State::new();
        state.upsert_trade(TradeUpdate {
            last_sweet_spot: Some(U256::from(2)),
            position: Some(EventPosition::new(20, 0)),
            ..TradeUpdate::new(U256::from(7))
        });
        state.prune_settled(100, 60);
        assert_eq!(state.unassigned_since(&U256::from(7)), Some(100));

        state.upsert_trade(created(7, pair, 5));
        assert_eq!(state.unassigned_since(&U256::from(7)), None);
        assert!(state.prune_settled(1000, 60).expired.is_empty());
        assert!(state.trade(&U256::from(7)).is_some());
    }

    #[test]
    fn test_prune_settled_revives_reactivated_pair() {
        let pair = test_pair();
        let mut state = State::new();
        state.upsert_trade(created(1, pair, 5));
        state.mark_completed(&pair, &U256::from(1));
        state.prune_settled(100, 60);

        state.upsert_trade(created(2, pair, 5));
        assert_eq!(state.pair(&pair).unwrap().settled_since(), None);
        assert!(!state.prune_settled(200, 60).changed());
        assert!(state.pair(&pair).is_some());
    }
}
