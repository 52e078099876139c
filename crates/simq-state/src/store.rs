//! StateStore — redb-backed persistence for simq.
//!
//! Provides the code catalog, the append-only experiment ledger and the
//! work-unit queue. All values are JSON-serialized into redb's `&[u8]`
//! value columns. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, Table};
use serde::Deserialize;
use tracing::{debug, info, warn};

use simq_core::config::DEFAULT_BATCH_LIMIT;
use simq_core::{CodeRecord, ExperimentRecord, TripleKey, WorkUnit};

use crate::batch::write_in_chunks;
use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// The ledger only needs the frame count when summing.
#[derive(Deserialize)]
struct FrameCount {
    frames: u64,
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    batch_limit: usize,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            batch_limit: DEFAULT_BATCH_LIMIT,
        };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self {
            db: Arc::new(db),
            batch_limit: DEFAULT_BATCH_LIMIT,
        };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Cap the number of operations per bulk-write transaction.
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    pub fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CODES).map_err(map_err!(Table))?;
        txn.open_table(EXPERIMENTS).map_err(map_err!(Table))?;
        txn.open_table(WORK_UNITS).map_err(map_err!(Table))?;
        txn.open_table(QUARANTINED_UNITS).map_err(map_err!(Table))?;
        txn.open_table(IN_FLIGHT).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Code catalog ───────────────────────────────────────────────

    /// Insert or update a code descriptor.
    pub fn put_code(&self, code: &CodeRecord) -> StateResult<()> {
        simq_core::validate_segment("code_type", &code.code_type)?;
        simq_core::validate_segment("code_id", &code.code_id)?;
        let key = code.table_key();
        let value = serde_json::to_vec(code).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(CODES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, n = code.n, "code stored");
        Ok(())
    }

    /// Get a code by type and id.
    pub fn get_code(&self, code_type: &str, code_id: &str) -> StateResult<Option<CodeRecord>> {
        let key = format!("{code_type}/{code_id}");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CODES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let code: CodeRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(code))
            }
            None => Ok(None),
        }
    }

    /// List the codes of one type, optionally restricted to block lengths.
    ///
    /// An empty `lengths` slice applies no filter.
    pub fn list_codes(&self, code_type: &str, lengths: &[u32]) -> StateResult<Vec<CodeRecord>> {
        let prefix = format!("{code_type}/");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(CODES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let code: CodeRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if lengths.is_empty() || lengths.contains(&code.n) {
                results.push(code);
            }
        }
        Ok(results)
    }

    // ── Experiment ledger ──────────────────────────────────────────

    /// Append an experiment record. Never overwrites an earlier record.
    ///
    /// Returns the ledger sequence number assigned to the record.
    pub fn record(&self, experiment: &ExperimentRecord) -> StateResult<u64> {
        let triple = experiment.triple();
        triple.validate()?;
        let value = serde_json::to_vec(experiment).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let seq;
        {
            let mut sequences = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            seq = next_sequence(&mut sequences, EXPERIMENT_SEQUENCE, 1)?;
            let key = format!("{}{seq:020}", triple.prefix());
            let mut table = txn.open_table(EXPERIMENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%triple, frames = experiment.frames, seq, "experiment recorded");
        Ok(seq)
    }

    /// Total messages simulated for a triple across all ledger entries.
    pub fn completed(&self, triple: &TripleKey) -> StateResult<u64> {
        triple.validate()?;
        let prefix = triple.prefix();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EXPERIMENTS).map_err(map_err!(Table))?;
        let mut total = 0u64;
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let record: FrameCount =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            total = total.saturating_add(record.frames);
        }
        Ok(total)
    }

    /// All ledger entries for a triple, oldest first.
    pub fn list_experiments(&self, triple: &TripleKey) -> StateResult<Vec<ExperimentRecord>> {
        triple.validate()?;
        let prefix = triple.prefix();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(EXPERIMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.range(prefix.as_str()..).map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if !key.value().starts_with(&prefix) {
                break;
            }
            let record: ExperimentRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    // ── Work-unit queue ────────────────────────────────────────────

    /// Persist work units in chunks of at most `batch_limit` per transaction.
    ///
    /// Each unit is assigned a fresh `unit_id`. On failure the error is
    /// `StateError::PartialBatch` and reports how many units were committed.
    pub fn enqueue_all(&self, units: &[WorkUnit]) -> StateResult<BatchReport> {
        for unit in units {
            unit.triple().validate()?;
        }
        let report = write_in_chunks(units, self.batch_limit, |chunk| self.enqueue_chunk(chunk))?;
        info!(units = report.units, chunks = report.chunks, "work units enqueued");
        Ok(report)
    }

    fn enqueue_chunk(&self, chunk: &[WorkUnit]) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut sequences = txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
            let mut queue = txn.open_table(WORK_UNITS).map_err(map_err!(Table))?;
            let mut in_flight = txn.open_table(IN_FLIGHT).map_err(map_err!(Table))?;

            let first_id = next_sequence(&mut sequences, UNIT_SEQUENCE, chunk.len() as u64)?;
            for (unit_id, unit) in (first_id..).zip(chunk) {
                let mut stored = unit.clone();
                stored.unit_id = Some(unit_id);
                let value = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
                let key = queue_key(stored.n, unit_id);
                queue
                    .insert(key.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
                adjust_in_flight(
                    &mut in_flight,
                    &stored.triple().prefix(),
                    stored.messages_requested,
                    true,
                )?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Remove and return the queued unit with the smallest block length.
    ///
    /// The read and the delete happen in one write transaction, so two
    /// concurrent callers never receive the same unit. Returns `None` when
    /// the queue is empty.
    ///
    /// Entries that no longer decode are moved to the quarantine table and
    /// skipped, so a bad entry cannot hold up the rest of the queue.
    pub fn dequeue_one(&self) -> StateResult<Option<WorkUnit>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (unit, quarantined) = {
            let mut queue = txn.open_table(WORK_UNITS).map_err(map_err!(Table))?;
            let mut in_flight = txn.open_table(IN_FLIGHT).map_err(map_err!(Table))?;
            let mut quarantine = txn.open_table(QUARANTINED_UNITS).map_err(map_err!(Table))?;
            let mut quarantined = 0u64;
            let unit = loop {
                let popped = queue
                    .pop_first()
                    .map_err(map_err!(Write))?
                    .map(|(key, value)| (key.value().to_string(), value.value().to_vec()));
                let Some((key, bytes)) = popped else {
                    break None;
                };
                match serde_json::from_slice::<WorkUnit>(&bytes) {
                    Ok(unit) => {
                        adjust_in_flight(
                            &mut in_flight,
                            &unit.triple().prefix(),
                            unit.messages_requested,
                            false,
                        )?;
                        break Some(unit);
                    }
                    Err(e) => {
                        warn!(%key, error = %e, "undecodable work unit quarantined");
                        release_raw(&mut in_flight, &bytes)?;
                        quarantine
                            .insert(key.as_str(), bytes.as_slice())
                            .map_err(map_err!(Write))?;
                        quarantined += 1;
                    }
                }
            };
            (unit, quarantined)
        };

        let Some(unit) = unit else {
            if quarantined == 0 {
                txn.abort().map_err(map_err!(Transaction))?;
            } else {
                txn.commit().map_err(map_err!(Transaction))?;
            }
            return Ok(None);
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(unit_id = ?unit.unit_id, n = unit.n, triple = %unit.triple(), "work unit dequeued");
        Ok(Some(unit))
    }

    /// Messages queued for a triple and not yet fetched by a worker.
    pub fn queued(&self, triple: &TripleKey) -> StateResult<u64> {
        triple.validate()?;
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(IN_FLIGHT).map_err(map_err!(Table))?;
        let queued = table
            .get(triple.prefix().as_str())
            .map_err(map_err!(Read))?
            .map(|guard| guard.value())
            .unwrap_or(0);
        Ok(queued)
    }

    /// Number of queued units and the messages they request.
    pub fn queue_depth(&self) -> StateResult<QueueDepth> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let queue = txn.open_table(WORK_UNITS).map_err(map_err!(Table))?;
        let quarantine = txn.open_table(QUARANTINED_UNITS).map_err(map_err!(Table))?;
        let in_flight = txn.open_table(IN_FLIGHT).map_err(map_err!(Table))?;
        let units = count_entries(&queue)?;
        let quarantined = count_entries(&quarantine)?;
        let mut messages = 0u64;
        for entry in in_flight.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            messages = messages.saturating_add(value.value());
        }
        Ok(QueueDepth {
            units,
            messages,
            quarantined,
        })
    }

    // ── Clearing ───────────────────────────────────────────────────

    /// Delete every entry of a logical collection. Returns the number removed.
    ///
    /// Entries are removed `batch_limit` at a time, one transaction per
    /// chunk, until the collection is empty. Clearing `prepared` also drops
    /// quarantined queue entries.
    pub fn clear(&self, collection: &str) -> StateResult<u64> {
        let parsed = Collection::parse(collection)?;
        let mut total = 0u64;
        loop {
            let removed = match &parsed {
                Collection::Prepared => match self.clear_queue_chunk()? {
                    0 => self.clear_documents_chunk(QUARANTINED_UNITS, "")?,
                    removed => removed,
                },
                Collection::Experiments => self.clear_documents_chunk(EXPERIMENTS, "")?,
                Collection::Codes(code_type) => {
                    self.clear_documents_chunk(CODES, &format!("{code_type}/"))?
                }
            };
            if removed == 0 {
                break;
            }
            total += removed;
        }
        info!(%collection, deleted = total, "collection cleared");
        Ok(total)
    }

    fn clear_documents_chunk(
        &self,
        table_def: redb::TableDefinition<'static, &'static str, &'static [u8]>,
        prefix: &str,
    ) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed;
        {
            let mut table = txn.open_table(table_def).map_err(map_err!(Table))?;
            let keys = collect_keys(&table, prefix, self.batch_limit)?;
            for key in &keys {
                table.remove(key.as_str()).map_err(map_err!(Write))?;
            }
            removed = keys.len() as u64;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(removed)
    }

    /// Remove one chunk of queued units, releasing their in-flight quota in
    /// the same transaction.
    fn clear_queue_chunk(&self) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let removed;
        {
            let mut queue = txn.open_table(WORK_UNITS).map_err(map_err!(Table))?;
            let mut in_flight = txn.open_table(IN_FLIGHT).map_err(map_err!(Table))?;
            let keys = collect_keys(&queue, "", self.batch_limit)?;
            for key in &keys {
                let bytes = queue
                    .remove(key.as_str())
                    .map_err(map_err!(Write))?
                    .map(|guard| guard.value().to_vec());
                let Some(bytes) = bytes else {
                    continue;
                };
                match serde_json::from_slice::<WorkUnit>(&bytes) {
                    Ok(unit) => adjust_in_flight(
                        &mut in_flight,
                        &unit.triple().prefix(),
                        unit.messages_requested,
                        false,
                    )?,
                    Err(_) => release_raw(&mut in_flight, &bytes)?,
                }
            }
            removed = keys.len() as u64;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(removed)
    }
}

/// Queue key ordering units by block length, then by enqueue order.
fn queue_key(n: u32, unit_id: u64) -> String {
    format!("{n:010}:{unit_id:020}")
}

/// Reserve `count` consecutive ids from a named sequence; returns the first.
fn next_sequence(
    sequences: &mut Table<'_, &'static str, u64>,
    name: &str,
    count: u64,
) -> StateResult<u64> {
    let first = sequences
        .get(name)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(1);
    sequences
        .insert(name, first + count)
        .map_err(map_err!(Write))?;
    Ok(first)
}

/// Add to or release from a triple's in-flight counter. Zeroed counters are
/// removed.
fn adjust_in_flight(
    in_flight: &mut Table<'_, &'static str, u64>,
    key: &str,
    messages: u64,
    add: bool,
) -> StateResult<()> {
    let current = in_flight
        .get(key)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);
    let updated = if add {
        current.saturating_add(messages)
    } else {
        current.saturating_sub(messages)
    };
    if updated == 0 {
        in_flight.remove(key).map_err(map_err!(Write))?;
    } else {
        in_flight.insert(key, updated).map_err(map_err!(Write))?;
    }
    Ok(())
}

/// Release the in-flight quota of a queue entry that does not decode as a
/// `WorkUnit`. Entries without a readable triple release nothing.
fn release_raw(in_flight: &mut Table<'_, &'static str, u64>, bytes: &[u8]) -> StateResult<()> {
    let Ok(serde_json::Value::Object(fields)) = serde_json::from_slice::<serde_json::Value>(bytes) else {
        return Ok(());
    };
    let (Some(code_type), Some(code_id), Some(channel_type), Some(snr)) = (
        str_field(&fields, "code_type"),
        str_field(&fields, "code_id"),
        str_field(&fields, "channel_type"),
        fields.get("snr").and_then(|v| v.as_f64()),
    ) else {
        return Ok(());
    };
    let messages = fields
        .get("messages_requested")
        .or_else(|| fields.get("messages"))
        .and_then(|v| v.as_u64())
        .unwrap_or(0);
    let triple = TripleKey::new(code_type, code_id, channel_type, snr);
    adjust_in_flight(in_flight, &triple.prefix(), messages, false)
}

fn str_field<'a>(fields: &'a serde_json::Map<String, serde_json::Value>, name: &str) -> Option<&'a str> {
    fields.get(name).and_then(|v| v.as_str())
}

fn count_entries<T>(table: &T) -> StateResult<u64>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut count = 0u64;
    for entry in table.iter().map_err(map_err!(Read))? {
        entry.map_err(map_err!(Read))?;
        count += 1;
    }
    Ok(count)
}

/// Up to `limit` keys starting with `prefix`, in key order.
fn collect_keys<T>(table: &T, prefix: &str, limit: usize) -> StateResult<Vec<String>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    let mut keys = Vec::new();
    for entry in table.range(prefix..).map_err(map_err!(Read))? {
        let (key, _) = entry.map_err(map_err!(Read))?;
        let key = key.value();
        if !key.starts_with(prefix) || keys.len() >= limit {
            break;
        }
        keys.push(key.to_string());
    }
    Ok(keys)
}
