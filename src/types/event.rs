use alloy::primitives::TxHash;

use super::EventPosition;

/// Events from a contiguous, inclusive range of blocks.
#[derive(Debug)]
pub struct ChunkEvents<T> {
    from_block: u64,
    to_block: u64,
    events: Vec<T>,
}

/// Event along with its position in chain history.
#[derive(Clone, Debug)]
pub struct EventContext<T> {
    pub(crate) tx_hash: TxHash,
    pub(crate) position: EventPosition,
    pub(crate) event: T,
}

impl<T> ChunkEvents<T> {
    pub(crate) fn new(from_block: u64, to_block: u64, events: Vec<T>) -> Self {
        Self {
            from_block,
            to_block,
            events,
        }
    }

    /// First block of the chunk.
    pub fn from_block(&self) -> u64 {
        self.from_block
    }

    /// Last block of the chunk, inclusive.
    pub fn to_block(&self) -> u64 {
        self.to_block
    }

    /// Decoded events, ordered by position.
    pub fn events(&self) -> &[T] {
        &self.events
    }
}

impl<T> EventContext<T> {
    pub fn new(tx_hash: TxHash, position: EventPosition, event: T) -> Self {
        Self {
            tx_hash,
            position,
            event,
        }
    }

    pub fn tx_hash(&self) -> TxHash {
        self.tx_hash
    }

    pub fn position(&self) -> EventPosition {
        self.position
    }

    pub fn block_number(&self) -> u64 {
        self.position.block_number()
    }

    pub fn log_index(&self) -> u64 {
        self.position.log_index()
    }

    pub fn event(&self) -> &T {
        &self.event
    }
}
