//! Domain types shared by the simq crates.
//!
//! Codes, experiment records and work units all carry an open-ended
//! parameter object next to their typed fields. Those parameters belong to
//! the simulation and are passed through untouched.

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Opaque JSON parameters attached to a code, result or work unit.
pub type Params = serde_json::Map<String, serde_json::Value>;

/// Channel model used when a request does not name one.
pub const DEFAULT_CHANNEL_TYPE: &str = "simple-bpsk";

// ── Keys ──────────────────────────────────────────────────────────

/// A key segment that cannot be stored.
#[derive(Debug, Error, PartialEq)]
#[error("invalid {field}: {reason}")]
pub struct InvalidKey {
    pub field: &'static str,
    pub reason: String,
}

/// Check that a string can be used as one segment of a `/`-separated key.
pub fn validate_segment(field: &'static str, value: &str) -> Result<(), InvalidKey> {
    if value.is_empty() {
        return Err(InvalidKey {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    if value.contains('/') {
        return Err(InvalidKey {
            field,
            reason: format!("{value:?} must not contain '/'"),
        });
    }
    Ok(())
}

/// Render an SNR as a key segment. `-0.0` and `0.0` share a bucket.
pub fn snr_segment(snr: f64) -> String {
    if snr == 0.0 {
        "0".to_string()
    } else {
        snr.to_string()
    }
}

/// The (code, channel, SNR) bucket that demand and progress are tracked in.
#[derive(Debug, Clone, PartialEq)]
pub struct TripleKey {
    pub code_type: String,
    pub code_id: String,
    pub channel_type: String,
    pub snr: f64,
}

impl TripleKey {
    pub fn new(code_type: &str, code_id: &str, channel_type: &str, snr: f64) -> Self {
        Self {
            code_type: code_type.to_string(),
            code_id: code_id.to_string(),
            channel_type: channel_type.to_string(),
            snr,
        }
    }

    /// Reject keys that would alias another bucket.
    pub fn validate(&self) -> Result<(), InvalidKey> {
        validate_segment("code_type", &self.code_type)?;
        validate_segment("code_id", &self.code_id)?;
        validate_segment("channel_type", &self.channel_type)?;
        if !self.snr.is_finite() {
            return Err(InvalidKey {
                field: "snr",
                reason: format!("{} is not a finite number", self.snr),
            });
        }
        Ok(())
    }

    /// Key prefix shared by every ledger entry of this triple.
    ///
    /// The trailing `/` keeps `snr = 1` from matching `snr = 10`.
    pub fn prefix(&self) -> String {
        format!(
            "{}/{}/{}/{}/",
            self.code_type,
            self.code_id,
            self.channel_type,
            snr_segment(self.snr)
        )
    }
}

impl fmt::Display for TripleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@{}:{}",
            self.code_type, self.code_id, self.channel_type, self.snr
        )
    }
}

// ── Code catalog ──────────────────────────────────────────────────

/// Descriptor of an error-correcting code, as held by the code catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CodeRecord {
    #[serde(alias = "id")]
    pub code_id: String,
    #[serde(default)]
    pub code_type: String,
    /// Block length.
    #[serde(rename = "N")]
    pub n: u32,
    /// Algorithm-specific parameters needed by the simulator.
    #[serde(flatten)]
    pub params: Params,
}

impl CodeRecord {
    /// Build the catalog key `{code_type}/{code_id}`.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.code_type, self.code_id)
    }
}

/// Ordered `code_type -> [code_id]` selection.
///
/// Deserializes from a JSON object and keeps the object's key order, which
/// determines the order work units are planned in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeSelection(pub Vec<(String, Vec<String>)>);

impl CodeSelection {
    pub fn push(&mut self, code_type: impl Into<String>, code_ids: Vec<String>) {
        self.0.push((code_type.into(), code_ids));
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|(_, ids)| ids.is_empty())
    }

    /// Iterate `(code_type, code_id)` pairs in selection order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|(code_type, ids)| {
            ids.iter().map(move |id| (code_type.as_str(), id.as_str()))
        })
    }
}

impl Serialize for CodeSelection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (code_type, ids) in &self.0 {
            map.serialize_entry(code_type, ids)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for CodeSelection {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct SelectionVisitor;

        impl<'de> Visitor<'de> for SelectionVisitor {
            type Value = CodeSelection;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of code type to a list of code ids")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut selection = CodeSelection::default();
                while let Some((code_type, ids)) = access.next_entry::<String, Vec<String>>()? {
                    selection.push(code_type, ids);
                }
                Ok(selection)
            }
        }

        deserializer.deserialize_map(SelectionVisitor)
    }
}

// ── Ledger ────────────────────────────────────────────────────────

/// One completed simulation run. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExperimentRecord {
    pub code_id: String,
    pub code_type: String,
    pub channel_type: String,
    pub snr: f64,
    /// Messages (frames) simulated in this run.
    pub frames: u64,
    /// Unix timestamp (seconds) when the record was written.
    #[serde(default)]
    pub recorded_at: u64,
    /// Simulation-specific result fields.
    #[serde(flatten)]
    pub extra: Params,
}

impl ExperimentRecord {
    pub fn triple(&self) -> TripleKey {
        TripleKey::new(&self.code_type, &self.code_id, &self.channel_type, self.snr)
    }
}

// ── Work queue ────────────────────────────────────────────────────

/// A self-contained task: simulate `messages_requested` messages for one
/// triple. Carries every code parameter the worker needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkUnit {
    /// Assigned by the queue store on enqueue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<u64>,
    pub code_id: String,
    pub code_type: String,
    pub channel_type: String,
    pub snr: f64,
    #[serde(rename = "N")]
    pub n: u32,
    #[serde(alias = "messages")]
    pub messages_requested: u64,
    #[serde(flatten)]
    pub params: Params,
}

/// Keys a work unit sets itself. Code parameters with these names are
/// dropped so the stamped values win.
pub const WORK_UNIT_FIELDS: &[&str] = &[
    "unit_id",
    "code_id",
    "code_type",
    "channel_type",
    "snr",
    "N",
    "messages_requested",
    "messages",
];

impl WorkUnit {
    /// Stamp a copy of the code's parameters with the triple and quota.
    pub fn for_code(code: &CodeRecord, channel_type: &str, snr: f64, messages: u64) -> Self {
        let mut params = code.params.clone();
        for field in WORK_UNIT_FIELDS {
            params.remove(*field);
        }
        Self {
            unit_id: None,
            code_id: code.code_id.clone(),
            code_type: code.code_type.clone(),
            channel_type: channel_type.to_string(),
            snr,
            n: code.n,
            messages_requested: messages,
            params,
        }
    }

    pub fn triple(&self) -> TripleKey {
        TripleKey::new(&self.code_type, &self.code_id, &self.channel_type, self.snr)
    }
}
