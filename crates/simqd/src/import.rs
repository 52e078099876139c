//! Catalog import — seeds the code catalog from a JSON export.
//!
//! The export is an array of code objects carrying an `id` (or `code_id`),
//! the block length `N`, and any algorithm-specific parameters. A `type`
//! field, if present, is dropped; the type comes from the command line.

use std::path::Path;

use anyhow::Context;
use tracing::info;

use simq_core::{CodeRecord, SimqConfig};

use crate::serve::open_store;

/// Parse an exported catalog into code records of the given type.
pub fn parse_catalog(code_type: &str, content: &str) -> anyhow::Result<Vec<CodeRecord>> {
    let entries: Vec<serde_json::Value> =
        serde_json::from_str(content).context("catalog must be a JSON array")?;
    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let mut code: CodeRecord = serde_json::from_value(entry)
                .with_context(|| format!("catalog entry {i} is not a code descriptor"))?;
            code.code_type = code_type.to_string();
            code.params.remove("type");
            Ok(code)
        })
        .collect()
}

pub fn run_import(config: &SimqConfig, code_type: &str, file: &Path) -> anyhow::Result<()> {
    simq_core::validate_segment("code_type", code_type)?;
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let codes = parse_catalog(code_type, &content)?;

    let (state, db_path) = open_store(&config.server.data_dir)?;
    for code in &codes {
        state.put_code(code)?;
    }
    info!(%code_type, count = codes.len(), path = ?db_path, "codes imported");
    Ok(())
}
