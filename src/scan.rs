//! Catch-up from the persisted cursor to the chain head.

use std::{pin::pin, sync::Arc};

use futures::StreamExt;
use tracing::{debug, info};

use crate::{
    chain::ChainClient, error::KeeperError, state::SharedState, store::StateStore, stream,
};

/// Blocks per log query unless configured otherwise.
pub const DEFAULT_CHUNK_SIZE: u64 = 2000;

/// Outcome of a cold scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Head block read when the scan started.
    pub head: u64,

    /// First block scanned, `None` if already caught up.
    pub start: Option<u64>,

    /// Chunks committed.
    pub chunks: usize,

    /// Decoded events applied.
    pub events: usize,

    /// Events that changed the state.
    pub changes: usize,
}

/// Walks historical blocks in chunks and projects their events, committing
/// the cursor and persisting the state after every chunk.
///
/// Head is read once per scan, blocks mined meanwhile are covered by the
/// live listener or the next scan.
#[derive(derive_more::Debug)]
pub struct ColdScanner<C, S> {
    #[debug(skip)]
    client: Arc<C>,
    #[debug(skip)]
    state: SharedState<S>,
    chunk_size: u64,
}

impl<C: ChainClient, S: StateStore> ColdScanner<C, S> {
    pub fn new(client: Arc<C>, state: SharedState<S>, chunk_size: u64) -> Self {
        Self {
            client,
            state,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Scans from the persisted cursor, or `from_block` if that is further,
    /// to the current head.
    ///
    /// A chunk failure aborts the scan, chunks committed before it are kept
    /// and the next scan resumes at the failed chunk.
    pub async fn scan(&self, from_block: u64) -> Result<ScanSummary, KeeperError> {
        let head = self.client.block_number().await?;
        let cursor = self.state.read(|s| s.last_scanned_block()).await;
        let start = cursor.unwrap_or_default().max(from_block);

        let mut summary = ScanSummary {
            head,
            ..Default::default()
        };
        if start > head {
            debug!(start, head, "Already caught up");
            return Ok(summary);
        }
        summary.start = Some(start);
        info!(start, head, chunk_size = self.chunk_size, "Starting cold scan");

        let mut chunks = pin!(stream::chunks(
            self.client.as_ref(),
            start,
            head,
            self.chunk_size
        ));
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            let changes = self
                .state
                .commit(|state| {
                    let changes = chunk
                        .events()
                        .iter()
                        .filter_map(|event| state.apply_raw(event))
                        .count();
                    state.commit_cursor(chunk.to_block().saturating_add(1));
                    changes
                })
                .await?;

            summary.chunks += 1;
            summary.events += chunk.events().len();
            summary.changes += changes;
            debug!(
                from_block = chunk.from_block(),
                to_block = chunk.to_block(),
                events = chunk.events().len(),
                changes,
                "Chunk committed"
            );
        }

        info!(
            head,
            chunks = summary.chunks,
            events = summary.events,
            changes = summary.changes,
            "Cold scan completed"
        );
        Ok(summary)
    }
}
