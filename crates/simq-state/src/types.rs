//! Store-level types: logical collections and bulk-write reports.

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// Name of the work-unit queue collection.
pub const PREPARED_COLLECTION: &str = "prepared";

/// Name of the experiment ledger collection.
pub const EXPERIMENTS_COLLECTION: &str = "experiments";

/// Prefix of per-code-type catalog collections (`codes/<code_type>`).
pub const CODES_COLLECTION_PREFIX: &str = "codes/";

/// A logical collection that can be cleared as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Collection {
    /// The work-unit queue.
    Prepared,
    /// The experiment ledger.
    Experiments,
    /// Catalog entries of one code type.
    Codes(String),
}

impl Collection {
    pub fn parse(name: &str) -> StateResult<Self> {
        match name {
            PREPARED_COLLECTION => Ok(Collection::Prepared),
            EXPERIMENTS_COLLECTION => Ok(Collection::Experiments),
            _ => match name.strip_prefix(CODES_COLLECTION_PREFIX) {
                Some(code_type) if !code_type.is_empty() && !code_type.contains('/') => {
                    Ok(Collection::Codes(code_type.to_string()))
                }
                _ => Err(StateError::UnknownCollection(name.to_string())),
            },
        }
    }
}

/// Outcome of a chunked bulk write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Entries persisted.
    pub units: usize,
    /// Transactions committed.
    pub chunks: usize,
}

/// Current size of the work-unit queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub units: u64,
    /// Sum of `messages_requested` across queued units.
    pub messages: u64,
    /// Entries pulled off the queue because they could not be decoded.
    #[serde(default)]
    pub quarantined: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_known_collections() {
        assert_eq!(Collection::parse("prepared").unwrap(), Collection::Prepared);
        assert_eq!(
            Collection::parse("experiments").unwrap(),
            Collection::Experiments
        );
        assert_eq!(
            Collection::parse("codes/fast-ssc").unwrap(),
            Collection::Codes("fast-ssc".to_string())
        );
    }

    #[test]
    fn parse_rejects_unknown_names() {
        for name in ["", "codes/", "codes/a/b", "ga-dump"] {
            assert!(
                matches!(Collection::parse(name), Err(StateError::UnknownCollection(_))),
                "{name} should be rejected"
            );
        }
    }
}
