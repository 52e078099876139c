//! simq-scheduler — demand planning and the work-queue facade.
//!
//! Turns a message target into bounded work units, netting out what the
//! experiment ledger already holds, and serves those units to workers.
//!
//! # Architecture
//!
//! ```text
//! Scheduler (prepare / fetch_work / submit_result / clear)
//!   ├── Planner
//!   │     ├── CodeCatalog  (code parameters by type + id)
//!   │     └── DemandLedger (completed + queued messages per triple)
//!   └── StateStore (redb: catalog, ledger, work-unit queue)
//! ```

pub mod error;
pub mod planner;
pub mod request;
pub mod scheduler;

pub use error::{SchedulerError, SchedulerResult};
pub use planner::{CodeCatalog, DemandLedger, Plan, PlanParams, Planner};
pub use request::{ClearRequest, PrepareOutcome, PrepareRequest, RouteParams, SubmitRequest};
pub use scheduler::Scheduler;
