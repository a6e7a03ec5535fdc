//! Pending write queue committed as chunked bulk requests

use std::time::Instant;

use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::config::BulkConfig;
use crate::domain::{BulkItemResult, BulkOutcome, SearchEngine, WriteIntent};
use crate::error::{Result, StoreError};

/// Thread-safe queue of write intents
///
/// The lock covers appends and the swap at commit start, never the bulk
/// calls themselves. A producer racing a commit lands either in the
/// captured batch or in the fresh queue.
#[derive(Debug, Default)]
pub struct ActionQueue {
    pending: Mutex<Vec<WriteIntent>>,
}

impl ActionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, intent: WriteIntent) {
        debug!(op = intent.kind.as_str(), index = %intent.index, id = %intent.id, "Write queued");
        self.pending.lock().push(intent);
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Drop everything pending without sending it
    pub fn clear(&self) -> usize {
        std::mem::take(&mut *self.pending.lock()).len()
    }

    /// Send every pending intent as `chunk_size`-item bulk requests over
    /// `worker_count` workers. Results keep enqueue order. The queue is
    /// empty afterwards whether or not a chunk failed.
    pub fn commit(&self, engine: &dyn SearchEngine, bulk: BulkConfig) -> Result<BulkOutcome> {
        let captured = std::mem::take(&mut *self.pending.lock());
        if captured.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let start = Instant::now();
        let chunk_size = bulk.chunk_size.max(1);
        let chunks: Vec<&[WriteIntent]> = captured.chunks(chunk_size).collect();

        let per_chunk: Vec<Vec<BulkItemResult>> = if chunks.len() == 1 || bulk.worker_count <= 1 {
            chunks
                .iter()
                .map(|chunk| engine.bulk(chunk))
                .collect::<Result<Vec<_>>>()?
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(bulk.worker_count.min(chunks.len()))
                .thread_name(|i| format!("searchstore-bulk-{}", i))
                .build()
                .map_err(|e| {
                    StoreError::transport(format!("Failed to build bulk worker pool: {}", e))
                })?;
            pool.install(|| {
                chunks
                    .par_iter()
                    .map(|chunk| engine.bulk(chunk))
                    .collect::<Result<Vec<_>>>()
            })?
        };

        let outcome = BulkOutcome::new(per_chunk.into_iter().flatten().collect());
        let failed = outcome.failures().len();
        if failed > 0 {
            warn!(failed, total = outcome.len(), "Bulk commit had item failures");
        }
        info!(
            items = outcome.len(),
            chunks = chunks.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Bulk commit complete"
        );
        Ok(outcome)
    }
}
