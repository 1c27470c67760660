use alloy::{rpc::types::Log, sol_types::SolEventInterface};
use futures::{Stream, StreamExt, stream};
use itertools::Itertools;
use tracing::debug;

use crate::{
    abi::protocol::StreamCore::StreamCoreEvents,
    chain::ChainClient,
    error::KeeperError,
    types::{self, EventPosition},
};

pub type RawEvent = types::EventContext<StreamCoreEvents>;
pub type RawChunk = types::ChunkEvents<RawEvent>;

/// Decodes a log emitted by the core contract.
///
/// Logs of unrelated events are skipped.
pub fn decode(log: &Log) -> Option<RawEvent> {
    match StreamCoreEvents::decode_log(&log.inner) {
        Ok(decoded) => Some(RawEvent::new(
            log.transaction_hash.unwrap_or_default(),
            position(log),
            decoded.data,
        )),
        Err(err) => {
            debug!(
                block_number = ?log.block_number,
                log_index = ?log.log_index,
                %err,
                "Skipping unrelated log"
            );
            None
        }
    }
}

/// Position of the log, pending logs are positioned at the chain start.
pub fn position(log: &Log) -> EventPosition {
    EventPosition::new(
        log.block_number.unwrap_or_default(),
        log.log_index.unwrap_or_default(),
    )
}

/// Splits the inclusive block range into inclusive chunks of at most
/// `chunk_size` blocks.
pub fn chunk_ranges(from_block: u64, to_block: u64, chunk_size: u64) -> Vec<(u64, u64)> {
    let chunk_size = chunk_size.max(1);
    let mut ranges = vec![];
    let mut start = from_block;
    while start <= to_block {
        let end = start.saturating_add(chunk_size - 1).min(to_block);
        ranges.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    ranges
}

/// Returns stream of decoded core contract events from the inclusive block
/// range, batched per chunk of at most `chunk_size` blocks.
///
/// Chunks are fetched sequentially, events within a chunk are ordered by
/// position. A failed fetch is yielded as an error and the stream moves on
/// to the next chunk, consumers committing progress per chunk should stop
/// on the first error.
pub fn chunks<C: ChainClient>(
    client: &C,
    from_block: u64,
    to_block: u64,
    chunk_size: u64,
) -> impl Stream<Item = Result<RawChunk, KeeperError>> + '_ {
    stream::iter(chunk_ranges(from_block, to_block, chunk_size)).then(
        move |(start, end)| async move {
            let logs = client.logs(start, end).await?;
            let events = logs
                .iter()
                .filter_map(decode)
                .sorted_by_key(|event| event.position())
                .collect();
            Ok(RawChunk::new(start, end, events))
        },
    )
}
