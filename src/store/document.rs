//! On-disk layout of the state.
//!
//! Integers that can exceed 64 bits are kept as decimal strings, fields
//! never observed are omitted rather than written as zero.

use std::{collections::BTreeMap, str::FromStr};

use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::{
    state::{Pair, State, Trade},
    types::{EventPosition, PairId},
};

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StateDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_scanned_block: Option<String>,
    #[serde(default)]
    pairs: BTreeMap<String, PairDocument>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    unassigned: BTreeMap<String, TradeDocument>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    unassigned_since: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PairDocument {
    trade_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    settled_since: Option<u64>,
    trades: BTreeMap<String, TradeDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradeDocument {
    trade_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pair_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_in: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token_out: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_sweet_spot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    amount_remaining: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    realised_amount_out: Option<String>,
    #[serde(default)]
    completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_update: Option<PositionDocument>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionDocument {
    block_number: u64,
    log_index: u64,
}

impl From<&State> for StateDocument {
    fn from(state: &State) -> Self {
        Self {
            last_scanned_block: state.last_scanned_block().map(|b| b.to_string()),
            pairs: state
                .pairs()
                .values()
                .map(|pair| (pair.id().to_string(), PairDocument::from(pair)))
                .collect(),
            unassigned: state
                .unassigned()
                .values()
                .map(|trade| (trade.id().to_string(), TradeDocument::from(trade)))
                .collect(),
            unassigned_since: state
                .unassigned()
                .keys()
                .filter_map(|id| Some((id.to_string(), state.unassigned_since(id)?)))
                .collect(),
        }
    }
}

impl From<&Pair> for PairDocument {
    fn from(pair: &Pair) -> Self {
        Self {
            trade_ids: pair.trade_ids().iter().map(U256::to_string).collect(),
            settled_since: pair.settled_since(),
            trades: pair
                .trades()
                .values()
                .map(|trade| (trade.id().to_string(), TradeDocument::from(trade)))
                .collect(),
        }
    }
}

impl From<&Trade> for TradeDocument {
    fn from(trade: &Trade) -> Self {
        Self {
            trade_id: trade.id().to_string(),
            pair_id: trade.pair_id().map(|id| id.to_string()),
            token_in: trade.token_in().map(|a| a.to_string()),
            token_out: trade.token_out().map(|a| a.to_string()),
            last_sweet_spot: trade.last_sweet_spot().map(|v| v.to_string()),
            amount_remaining: trade.amount_remaining().map(|v| v.to_string()),
            realised_amount_out: trade.realised_amount_out().map(|v| v.to_string()),
            completed: trade.completed(),
            last_update: trade.last_update().map(|pos| PositionDocument {
                block_number: pos.block_number(),
                log_index: pos.log_index(),
            }),
        }
    }
}

impl TryFrom<StateDocument> for State {
    type Error = StoreError;

    fn try_from(doc: StateDocument) -> Result<Self, Self::Error> {
        let last_scanned_block = doc
            .last_scanned_block
            .as_deref()
            .map(|s| parse::<u64>("lastScannedBlock", s))
            .transpose()?;

        let mut pairs = std::collections::HashMap::with_capacity(doc.pairs.len());
        for (key, pair_doc) in doc.pairs {
            let pair_id = parse_b256("pair ID", &key)?;
            let mut pair = Pair::new(pair_id);
            pair.settled_since = pair_doc.settled_since;
            let mut trades = pair_doc.trades;
            for id in &pair_doc.trade_ids {
                let trade_doc = trades.remove(id).ok_or_else(|| {
                    StoreError::Malformed(format!("pair {key} lists unknown trade {id}"))
                })?;
                let mut trade = trade_doc.into_trade()?;
                trade.pair_id = Some(pair_id);
                pair.trade_entry(trade);
            }
            if let Some(id) = trades.keys().next() {
                return Err(StoreError::Malformed(format!(
                    "pair {key} does not list trade {id}"
                )));
            }
            pairs.insert(pair_id, pair);
        }

        let unassigned = doc
            .unassigned
            .into_values()
            .map(|trade_doc| trade_doc.into_trade().map(|t| (t.id(), t)))
            .collect::<Result<_, _>>()?;

        let unassigned_since = doc
            .unassigned_since
            .iter()
            .map(|(id, since)| Ok((parse_u256("unassignedSince", id)?, *since)))
            .collect::<Result<_, StoreError>>()?;

        Ok(State::from_parts(
            last_scanned_block,
            pairs,
            unassigned,
            unassigned_since,
        ))
    }
}

impl TradeDocument {
    fn into_trade(self) -> Result<Trade, StoreError> {
        let mut trade = Trade::new(parse_u256("tradeId", &self.trade_id)?);
        trade.pair_id = self
            .pair_id
            .as_deref()
            .map(|s| parse_b256("pairId", s))
            .transpose()?;
        trade.token_in = opt(self.token_in.as_deref(), |s| parse::<Address>("tokenIn", s))?;
        trade.token_out = opt(self.token_out.as_deref(), |s| parse::<Address>("tokenOut", s))?;
        trade.last_sweet_spot = opt(self.last_sweet_spot.as_deref(), |s| {
            parse_u256("lastSweetSpot", s)
        })?;
        trade.amount_remaining = opt(self.amount_remaining.as_deref(), |s| {
            parse_u256("amountRemaining", s)
        })?;
        trade.realised_amount_out = opt(self.realised_amount_out.as_deref(), |s| {
            parse_u256("realisedAmountOut", s)
        })?;
        trade.completed = self.completed;
        trade.last_update = self
            .last_update
            .map(|pos| EventPosition::new(pos.block_number, pos.log_index));
        Ok(trade)
    }
}

fn opt<T>(
    value: Option<&str>,
    f: impl FnOnce(&str) -> Result<T, StoreError>,
) -> Result<Option<T>, StoreError> {
    value.map(f).transpose()
}

fn parse<T: FromStr>(field: &str, value: &str) -> Result<T, StoreError> {
    value
        .parse()
        .map_err(|_| StoreError::Malformed(format!("invalid {field}: {value:?}")))
}

/// Plain decimal digits only, hex renderings are rejected.
fn parse_u256(field: &str, value: &str) -> Result<U256, StoreError> {
    let malformed = || StoreError::Malformed(format!("invalid {field}: {value:?}"));
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    U256::from_str_radix(value, 10).map_err(|_| malformed())
}

fn parse_b256(field: &str, value: &str) -> Result<PairId, StoreError> {
    parse::<B256>(field, value)
}
