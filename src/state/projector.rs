use alloy::primitives::U256;

use super::*;
use crate::{
    abi::protocol::StreamCore::{self, StreamCoreEvents},
    stream::RawEvent,
    types::{EventPosition, pair_id},
};

/// Observable effect of an applied event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TradeChange {
    Created {
        trade_id: TradeId,
        pair_id: PairId,
    },
    Progressed {
        trade_id: TradeId,
        last_sweet_spot: U256,
    },
    Completed {
        trade_id: TradeId,
        reason: CompletionReason,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionReason {
    /// Nothing left to stream.
    Exhausted,
    Cancelled,
    Settled,
}

impl TradeChange {
    pub fn trade_id(&self) -> TradeId {
        match self {
            Self::Created { trade_id, .. }
            | Self::Progressed { trade_id, .. }
            | Self::Completed { trade_id, .. } => *trade_id,
        }
    }
}

impl State {
    /// Applies a decoded event received from either the cold scan or the
    /// live feed.
    pub fn apply_raw(&mut self, event: &RawEvent) -> Option<TradeChange> {
        self.apply_event(event.position(), event.event())
    }

    /// Applies the core contract event observed at the given position.
    ///
    /// Events carry absolute values only, so applying the same event twice,
    /// or an older event after a newer one, never regresses trade progress.
    /// Returns the change if the view was affected.
    pub fn apply_event(
        &mut self,
        position: EventPosition,
        event: &StreamCoreEvents,
    ) -> Option<TradeChange> {
        match event {
            StreamCoreEvents::TradeCreated(e) => self.trade_created(position, e),
            StreamCoreEvents::TradeStreamExecuted(e) => self.trade_stream_executed(position, e),
            StreamCoreEvents::TradeCancelled(e) => self.trade_cancelled(position, e),
            StreamCoreEvents::TradeSettled(e) => self.trade_settled(position, e),
        }
    }

    fn trade_created(
        &mut self,
        position: EventPosition,
        event: &StreamCore::TradeCreated,
    ) -> Option<TradeChange> {
        let pair_id = pair_id(event.tokenIn, event.tokenOut);
        let exhausted = event.lastSweetSpot.is_zero() && event.amountRemaining.is_zero();
        let update = TradeUpdate {
            pair_id: Some(pair_id),
            token_in: Some(event.tokenIn),
            token_out: Some(event.tokenOut),
            last_sweet_spot: Some(event.lastSweetSpot),
            amount_remaining: Some(event.amountRemaining),
            realised_amount_out: Some(event.realisedAmountOut),
            completed: exhausted,
            position: Some(position),
            ..TradeUpdate::new(event.tradeId)
        };
        self.upsert_trade(update).then(|| {
            if exhausted {
                TradeChange::Completed {
                    trade_id: event.tradeId,
                    reason: CompletionReason::Exhausted,
                }
            } else {
                TradeChange::Created {
                    trade_id: event.tradeId,
                    pair_id,
                }
            }
        })
    }

    fn trade_stream_executed(
        &mut self,
        position: EventPosition,
        event: &StreamCore::TradeStreamExecuted,
    ) -> Option<TradeChange> {
        let exhausted = event.lastSweetSpot.is_zero();
        let update = TradeUpdate {
            last_sweet_spot: Some(event.lastSweetSpot),
            completed: exhausted,
            position: Some(position),
            ..TradeUpdate::new(event.tradeId)
        };
        self.upsert_trade(update).then(|| {
            if exhausted {
                TradeChange::Completed {
                    trade_id: event.tradeId,
                    reason: CompletionReason::Exhausted,
                }
            } else {
                TradeChange::Progressed {
                    trade_id: event.tradeId,
                    last_sweet_spot: event.lastSweetSpot,
                }
            }
        })
    }

    fn trade_cancelled(
        &mut self,
        position: EventPosition,
        event: &StreamCore::TradeCancelled,
    ) -> Option<TradeChange> {
        let update = TradeUpdate {
            amount_remaining: Some(event.amountRemaining),
            realised_amount_out: Some(event.realisedAmountOut),
            completed: true,
            position: Some(position),
            ..TradeUpdate::new(event.tradeId)
        };
        self.upsert_trade(update).then_some(TradeChange::Completed {
            trade_id: event.tradeId,
            reason: CompletionReason::Cancelled,
        })
    }

    fn trade_settled(
        &mut self,
        position: EventPosition,
        event: &StreamCore::TradeSettled,
    ) -> Option<TradeChange> {
        let update = TradeUpdate {
            realised_amount_out: Some(event.totalAmountOut),
            completed: true,
            position: Some(position),
            ..TradeUpdate::new(event.tradeId)
        };
        self.upsert_trade(update).then_some(TradeChange::Completed {
            trade_id: event.tradeId,
            reason: CompletionReason::Settled,
        })
    }
}
