//! simq-state — durable store for the simulation work-queue scheduler.
//!
//! Backed by [redb](https://docs.rs/redb). Holds three logical collections:
//! the code catalog, the append-only experiment ledger, and the work-unit
//! queue, plus a per-triple counter of queued-but-unfetched messages.
//!
//! # Architecture
//!
//! Domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Ledger keys are `{code_type}/{code_id}/{channel_type}/{snr}/{seq}` so the
//! messages completed for a triple are one prefix scan. Queue keys are
//! `{N:010}:{unit_id:020}`, which makes the first key the unit with the
//! smallest block length.
//!
//! Every mutation runs in a single redb write transaction. redb serializes
//! writers, so popping a unit cannot hand the same unit to two callers.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`).

pub mod batch;
pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
