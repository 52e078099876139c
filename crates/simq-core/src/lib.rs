//! simq-core — shared domain types and configuration for the simulation
//! work-queue scheduler.

pub mod config;
pub mod types;

pub use config::{ConfigError, FinalUnitPolicy, SchedulerSettings, ServerConfig, SimqConfig};
pub use types::*;
