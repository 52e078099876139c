//! simq-api — REST binding of the work-queue scheduler.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/prepare` | Plan demand and enqueue work units |
//! | GET | `/get-params` | Take the next work unit (204 when none) |
//! | POST | `/save-result` | Append a finished run to the ledger |
//! | POST | `/clear` | Delete whole collections |
//! | GET | `/status` | Queue depth |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use simq_scheduler::Scheduler;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Scheduler,
}

/// Build the complete API router.
pub fn build_router(scheduler: Scheduler) -> Router {
    let api_state = ApiState { scheduler };

    Router::new()
        .route("/prepare", post(handlers::prepare))
        .route("/get-params", get(handlers::fetch_work))
        .route("/save-result", post(handlers::submit_result))
        .route("/clear", post(handlers::clear))
        .route("/status", get(handlers::status))
        .with_state(api_state)
}
