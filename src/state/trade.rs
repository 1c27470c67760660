use alloy::primitives::{Address, U256};

use crate::types::{EventPosition, PairId, TradeId};

/// Streaming trade as observed through the core contract events.
///
/// Numeric fields stay unset until an event carrying them is observed,
/// so "never observed" is distinguishable from an observed zero.
#[derive(Clone, PartialEq, Eq, derive_more::Debug)]
pub struct Trade {
    #[debug("{id}")]
    pub(crate) id: TradeId,
    pub(crate) pair_id: Option<PairId>,
    pub(crate) token_in: Option<Address>,
    pub(crate) token_out: Option<Address>,
    pub(crate) last_sweet_spot: Option<U256>,
    pub(crate) amount_remaining: Option<U256>,
    pub(crate) realised_amount_out: Option<U256>,
    pub(crate) completed: bool,
    pub(crate) last_update: Option<EventPosition>,
}

/// Partial trade state to merge into the tracked one.
///
/// Unset fields leave the tracked values intact, `completed` can only
/// ever flip the trade to completed.
#[derive(Clone, Debug, Default)]
pub struct TradeUpdate {
    pub trade_id: TradeId,
    pub pair_id: Option<PairId>,
    pub token_in: Option<Address>,
    pub token_out: Option<Address>,
    pub last_sweet_spot: Option<U256>,
    pub amount_remaining: Option<U256>,
    pub realised_amount_out: Option<U256>,
    pub completed: bool,

    /// Position of the event the update is derived from, if any.
    pub position: Option<EventPosition>,
}

impl Trade {
    pub(crate) fn new(id: TradeId) -> Self {
        Self {
            id,
            pair_id: None,
            token_in: None,
            token_out: None,
            last_sweet_spot: None,
            amount_remaining: None,
            realised_amount_out: None,
            completed: false,
            last_update: None,
        }
    }

    /// Protocol ID of the trade.
    pub fn id(&self) -> TradeId {
        self.id
    }

    /// Pair the trade belongs to, unknown until its creation is observed.
    pub fn pair_id(&self) -> Option<PairId> {
        self.pair_id
    }

    pub fn token_in(&self) -> Option<Address> {
        self.token_in
    }

    pub fn token_out(&self) -> Option<Address> {
        self.token_out
    }

    /// Streaming execution progress marker, zero once no further
    /// streamed execution is needed.
    pub fn last_sweet_spot(&self) -> Option<U256> {
        self.last_sweet_spot
    }

    pub fn amount_remaining(&self) -> Option<U256> {
        self.amount_remaining
    }

    pub fn realised_amount_out(&self) -> Option<U256> {
        self.realised_amount_out
    }

    pub fn completed(&self) -> bool {
        self.completed
    }

    /// Position of the latest event that updated trade progress.
    pub fn last_update(&self) -> Option<EventPosition> {
        self.last_update
    }

    pub fn is_outstanding(&self) -> bool {
        !self.completed
    }

    /// Outstanding trade with a positive sweet spot.
    pub fn needs_execution(&self) -> bool {
        self.is_outstanding() && self.last_sweet_spot.is_some_and(|s| !s.is_zero())
    }

    /// Merges the update into the trade, returns `true` if anything changed.
    ///
    /// Progress fields are overwritten only by updates positioned after the
    /// last applied one, stale or replayed updates can only fill the fields
    /// that were never observed.
    pub(crate) fn merge(&mut self, update: &TradeUpdate) -> bool {
        let before = self.clone();

        if self.pair_id.is_none() {
            self.pair_id = update.pair_id;
        }
        if update.token_in.is_some() {
            self.token_in = update.token_in;
        }
        if update.token_out.is_some() {
            self.token_out = update.token_out;
        }

        let is_newer = match (update.position, self.last_update) {
            (Some(pos), Some(last)) => pos > last,
            _ => true,
        };
        if is_newer {
            overwrite(&mut self.last_sweet_spot, update.last_sweet_spot);
            overwrite(&mut self.amount_remaining, update.amount_remaining);
            overwrite(&mut self.realised_amount_out, update.realised_amount_out);
            if update.position.is_some() {
                self.last_update = update.position;
            }
        } else {
            fill(&mut self.last_sweet_spot, update.last_sweet_spot);
            fill(&mut self.amount_remaining, update.amount_remaining);
            fill(&mut self.realised_amount_out, update.realised_amount_out);
        }

        self.completed |= update.completed;

        *self != before
    }
}

fn overwrite<T>(field: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *field = value;
    }
}

fn fill<T>(field: &mut Option<T>, value: Option<T>) {
    if field.is_none() {
        *field = value;
    }
}

impl TradeUpdate {
    pub fn new(trade_id: TradeId) -> Self {
        Self {
            trade_id,
            ..Default::default()
        }
    }
}
