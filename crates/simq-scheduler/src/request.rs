//! Request and response schemas for the four scheduler operations.
//!
//! Required fields are plain (non-`Option`) so a payload missing one is
//! rejected while deserializing, before any planning happens.

use serde::{Deserialize, Serialize};

use simq_core::{CodeSelection, Params};

/// Body of a prepare call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PrepareRequest {
    /// Code types searched when codes are selected by length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_types: Option<Vec<String>>,
    /// Select catalog codes by block length. An empty list selects all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_lengths: Option<Vec<u32>>,
    /// Explicit `code_type -> [code_id]` selection; wins over `code_lengths`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codes: Option<CodeSelection>,
    pub snr_range: Vec<f64>,
    pub required_messages: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub per_unit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<String>,
}

/// Result of a prepare call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PrepareOutcome {
    /// Work units enqueued.
    pub experiments: usize,
    /// Store transactions used to enqueue them.
    pub chunks: usize,
    /// `code_type/code_id` pairs that were not found in the catalog.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

/// Routing fields of a submitted result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteParams {
    pub code_type: String,
    pub code_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_type: Option<String>,
}

/// Body of a submit-result call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitRequest {
    pub route_params: RouteParams,
    #[serde(flatten)]
    pub result: ResultFields,
}

/// Result fields: the frame count and SNR are required, anything else the
/// simulator reports is kept verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResultFields {
    pub frames: u64,
    #[serde(alias = "snr_db")]
    pub snr: f64,
    #[serde(flatten)]
    pub extra: Params,
}

/// Body of a clear call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClearRequest {
    pub collections: Vec<String>,
}
