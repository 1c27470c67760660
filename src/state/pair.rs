use super::*;

/// Trades of a single token pair, in discovery order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pair {
    pub(crate) id: PairId,
    pub(crate) trade_ids: Vec<TradeId>,
    pub(crate) trades: HashMap<TradeId, Trade>,
    pub(crate) settled_since: Option<u64>,
}

impl Pair {
    pub(crate) fn new(id: PairId) -> Self {
        Self {
            id,
            trade_ids: vec![],
            trades: HashMap::new(),
            settled_since: None,
        }
    }

    /// ID of the pair.
    pub fn id(&self) -> PairId {
        self.id
    }

    /// IDs of the pair trades, in the order they were discovered.
    pub fn trade_ids(&self) -> &[TradeId] {
        &self.trade_ids
    }

    pub fn trades(&self) -> &HashMap<TradeId, Trade> {
        &self.trades
    }

    pub fn trade(&self, trade_id: &TradeId) -> Option<&Trade> {
        self.trades.get(trade_id)
    }

    /// Unix timestamp the pair was first seen with all trades completed
    /// by the pruning pass, if it is still in that state.
    pub fn settled_since(&self) -> Option<u64> {
        self.settled_since
    }

    /// Indicates if any of the pair trades is not completed yet.
    pub fn is_outstanding(&self) -> bool {
        self.trades.values().any(Trade::is_outstanding)
    }

    /// IDs of non-completed trades, in discovery order.
    pub fn outstanding_trade_ids(&self) -> Vec<TradeId> {
        self.trade_ids
            .iter()
            .filter(|id| self.trades.get(*id).is_some_and(Trade::is_outstanding))
            .copied()
            .collect()
    }

    /// Indicates if any of the pair trades needs further streamed execution.
    pub fn needs_execution(&self) -> bool {
        self.trades.values().any(Trade::needs_execution)
    }

    /// Inserts the trade if not tracked yet, keeping discovery order.
    pub(crate) fn trade_entry(&mut self, trade: Trade) -> &mut Trade {
        let id = trade.id;
        match self.trades.entry(id) {
            hash_map::Entry::Occupied(e) => e.into_mut(),
            hash_map::Entry::Vacant(e) => {
                self.trade_ids.push(id);
                e.insert(trade)
            }
        }
    }

    pub(crate) fn trade_mut(&mut self, trade_id: &TradeId) -> Option<&mut Trade> {
        self.trades.get_mut(trade_id)
    }
}
