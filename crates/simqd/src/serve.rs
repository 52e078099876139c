//! Serve mode — opens the state store and runs the HTTP API until Ctrl-C.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use simq_core::SimqConfig;
use simq_scheduler::Scheduler;
use simq_state::StateStore;

/// File name of the redb database inside the data directory.
pub const DB_FILE: &str = "simq.redb";

/// Open (creating if needed) the state store under `data_dir`.
pub fn open_store(data_dir: &Path) -> anyhow::Result<(StateStore, PathBuf)> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join(DB_FILE);
    let state = StateStore::open(&db_path)?;
    Ok((state, db_path))
}

pub async fn run_serve(config: SimqConfig) -> anyhow::Result<()> {
    info!("simq daemon starting");

    let (state, db_path) = open_store(&config.server.data_dir)?;
    info!(path = ?db_path, "state store opened");

    let depth = state.queue_depth()?;
    info!(
        units = depth.units,
        messages = depth.messages,
        "work queue loaded"
    );

    let scheduler = Scheduler::new(state, config.scheduler.clone());
    info!(
        batch_limit = config.scheduler.batch_limit,
        per_unit = config.scheduler.default_per_unit,
        final_unit = ?config.scheduler.final_unit,
        net_queued_demand = config.scheduler.net_queued_demand,
        max_units = config.scheduler.max_units_per_prepare,
        "scheduler initialized"
    );

    let router = simq_api::build_router(scheduler);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to install Ctrl-C handler");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("simq daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_store_creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("nested").join("simq");

        let (_state, db_path) = open_store(&data_dir).unwrap();
        assert!(data_dir.is_dir());
        assert_eq!(db_path, data_dir.join(DB_FILE));
    }
}
