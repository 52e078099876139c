//! Chunked bulk writes.
//!
//! Large writes are split into chunks of at most `limit` entries, each
//! committed in its own transaction, strictly in order. The first failing
//! chunk stops the run and the error reports how much was already durable.

use tracing::{debug, warn};

use crate::error::{StateError, StateResult};
use crate::types::BatchReport;

/// Apply `write` to consecutive chunks of `items`.
///
/// A `limit` of zero is treated as one.
pub fn write_in_chunks<T, F>(items: &[T], limit: usize, mut write: F) -> StateResult<BatchReport>
where
    F: FnMut(&[T]) -> StateResult<()>,
{
    let mut report = BatchReport::default();
    for chunk in items.chunks(limit.max(1)) {
        if let Err(source) = write(chunk) {
            warn!(
                persisted = report.units,
                chunks_committed = report.chunks,
                total = items.len(),
                error = %source,
                "bulk write aborted"
            );
            return Err(StateError::PartialBatch {
                persisted: report.units,
                chunks_committed: report.chunks,
                total: items.len(),
                source: Box::new(source),
            });
        }
        report.units += chunk.len();
        report.chunks += 1;
        debug!(chunk = report.chunks, size = chunk.len(), "chunk committed");
    }
    Ok(report)
}
