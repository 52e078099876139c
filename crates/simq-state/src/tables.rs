//! redb table definitions for the simq state store.
//!
//! Document tables use `&str` keys and `&[u8]` values (JSON-serialized
//! domain types). Counter tables hold plain `u64` values.

use redb::TableDefinition;

/// Code catalog keyed by `{code_type}/{code_id}`.
pub const CODES: TableDefinition<&str, &[u8]> = TableDefinition::new("codes");

/// Experiment ledger keyed by `{code_type}/{code_id}/{channel_type}/{snr}/{seq:020}`.
pub const EXPERIMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("experiments");

/// Work-unit queue keyed by `{N:010}:{unit_id:020}`.
pub const WORK_UNITS: TableDefinition<&str, &[u8]> = TableDefinition::new("work_units");

/// Queue entries that could not be decoded, moved aside under their queue key.
pub const QUARANTINED_UNITS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("quarantined_units");

/// Queued-but-unfetched messages keyed by triple prefix.
pub const IN_FLIGHT: TableDefinition<&str, u64> = TableDefinition::new("in_flight");

/// Monotonic id sequences keyed by sequence name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");

/// Sequence that numbers work units.
pub const UNIT_SEQUENCE: &str = "work_unit";

/// Sequence that numbers ledger entries.
pub const EXPERIMENT_SEQUENCE: &str = "experiment";
