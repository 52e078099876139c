//! Demand planner — converts a message target into work units.
//!
//! For every selected code and every requested SNR the planner computes how
//! many messages are still missing and slices that into units of at most
//! `per_unit` messages. Codes missing from the catalog are skipped, not
//! treated as a failure of the whole plan.

use tracing::{debug, warn};

use simq_core::config::DEFAULT_MAX_UNITS_PER_PREPARE;
use simq_core::{CodeRecord, CodeSelection, FinalUnitPolicy, TripleKey, WorkUnit};
use simq_state::{StateResult, StateStore};

use crate::error::{SchedulerError, SchedulerResult};

/// Read-only lookup of code parameters.
pub trait CodeCatalog {
    fn code(&self, code_type: &str, code_id: &str) -> StateResult<Option<CodeRecord>>;
}

/// Progress already made towards a triple's target.
pub trait DemandLedger {
    /// Messages recorded as simulated.
    fn completed(&self, triple: &TripleKey) -> StateResult<u64>;

    /// Messages queued but not yet handed to a worker.
    fn queued(&self, triple: &TripleKey) -> StateResult<u64>;
}

impl CodeCatalog for StateStore {
    fn code(&self, code_type: &str, code_id: &str) -> StateResult<Option<CodeRecord>> {
        self.get_code(code_type, code_id)
    }
}

impl DemandLedger for StateStore {
    fn completed(&self, triple: &TripleKey) -> StateResult<u64> {
        StateStore::completed(self, triple)
    }

    fn queued(&self, triple: &TripleKey) -> StateResult<u64> {
        StateStore::queued(self, triple)
    }
}

/// Target and slicing parameters of one plan.
#[derive(Debug, Clone, Copy)]
pub struct PlanParams<'a> {
    pub snr_range: &'a [f64],
    pub required_messages: u64,
    pub per_unit: u64,
    pub channel_type: &'a str,
}

/// Planned units, in insertion order, plus the codes that were skipped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub units: Vec<WorkUnit>,
    /// `code_type/code_id` of codes not found in the catalog.
    pub skipped: Vec<String>,
}

impl Plan {
    pub fn total_messages(&self) -> u64 {
        self.units.iter().map(|u| u.messages_requested).sum()
    }
}

pub struct Planner<'a, C, L> {
    catalog: &'a C,
    ledger: &'a L,
    final_unit: FinalUnitPolicy,
    net_queued_demand: bool,
    max_units: u64,
}

impl<'a, C: CodeCatalog, L: DemandLedger> Planner<'a, C, L> {
    /// A planner that over-provisions the final unit and ignores queued
    /// demand.
    pub fn new(catalog: &'a C, ledger: &'a L) -> Self {
        Self {
            catalog,
            ledger,
            final_unit: FinalUnitPolicy::FullBudget,
            net_queued_demand: false,
            max_units: DEFAULT_MAX_UNITS_PER_PREPARE,
        }
    }

    pub fn final_unit(mut self, policy: FinalUnitPolicy) -> Self {
        self.final_unit = policy;
        self
    }

    /// Refuse plans with more than `max_units` units in total.
    pub fn max_units(mut self, max_units: u64) -> Self {
        self.max_units = max_units;
        self
    }

    /// Also subtract messages that are queued but not yet fetched.
    pub fn net_queued_demand(mut self, enabled: bool) -> Self {
        self.net_queued_demand = enabled;
        self
    }

    pub fn plan(&self, selection: &CodeSelection, params: &PlanParams<'_>) -> SchedulerResult<Plan> {
        if params.per_unit == 0 {
            return Err(SchedulerError::Validation(
                "per_unit must be at least 1".to_string(),
            ));
        }

        let mut plan = Plan::default();
        for (code_type, code_id) in selection.pairs() {
            let Some(mut code) = self.catalog.code(code_type, code_id)? else {
                warn!(%code_type, %code_id, "code not found in catalog, skipping");
                plan.skipped.push(format!("{code_type}/{code_id}"));
                continue;
            };
            // Catalog entries imported without a type still plan under the
            // requested one.
            code.code_type = code_type.to_string();

            for &snr in params.snr_range {
                let triple = TripleKey::new(code_type, code_id, params.channel_type, snr);
                let completed = self.ledger.completed(&triple)?;
                let queued = if self.net_queued_demand {
                    self.ledger.queued(&triple)?
                } else {
                    0
                };
                let remaining = params
                    .required_messages
                    .saturating_sub(completed)
                    .saturating_sub(queued);

                let budget = self.max_units.saturating_sub(plan.units.len() as u64);
                let quotas = unit_quotas(remaining, params.per_unit, self.final_unit, budget)
                    .map_err(|e| {
                        SchedulerError::Validation(format!(
                            "{e}; plan is capped at {} units per prepare",
                            self.max_units
                        ))
                    })?;
                debug!(
                    %triple,
                    completed,
                    queued,
                    remaining,
                    units = quotas.len(),
                    "triple planned"
                );
                plan.units.extend(
                    quotas
                        .into_iter()
                        .map(|messages| WorkUnit::for_code(&code, params.channel_type, snr, messages)),
                );
            }
        }
        Ok(plan)
    }
}

/// Too many units for the remaining budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaOverflow {
    pub units: u64,
    pub budget: u64,
}

impl std::fmt::Display for QuotaOverflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} units needed but only {} allowed", self.units, self.budget)
    }
}

/// Split `remaining` messages into per-unit quotas.
///
/// Always `ceil(remaining / per_unit)` quotas. Under `FullBudget` each is
/// `per_unit`; under `ExactRemainder` the last one is trimmed. Fails without
/// allocating when that count exceeds `budget`.
pub fn unit_quotas(
    remaining: u64,
    per_unit: u64,
    policy: FinalUnitPolicy,
    budget: u64,
) -> Result<Vec<u64>, QuotaOverflow> {
    if remaining == 0 || per_unit == 0 {
        return Ok(Vec::new());
    }
    let count = remaining.div_ceil(per_unit);
    let overflow = QuotaOverflow { units: count, budget };
    if count > budget {
        return Err(overflow);
    }
    let len = usize::try_from(count).map_err(|_| overflow)?;
    let mut quotas = vec![per_unit; len];
    if policy == FinalUnitPolicy::ExactRemainder {
        if let Some(last) = quotas.last_mut() {
            *last = remaining - per_unit * (count - 1);
        }
    }
    Ok(quotas)
}
