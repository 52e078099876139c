//! Scheduler — the facade workers and operators talk to.
//!
//! The `Scheduler` owns a state store handle and the scheduling settings and
//! exposes the four operations:
//! - `prepare`: plan outstanding demand and enqueue work units
//! - `fetch_work`: hand out the queued unit with the smallest block length
//! - `submit_result`: append a finished run to the experiment ledger
//! - `clear`: wipe whole collections between campaigns

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use simq_core::{CodeSelection, ExperimentRecord, SchedulerSettings, TripleKey, WorkUnit};
use simq_state::{Collection, QueueDepth, StateStore};

use crate::error::{SchedulerError, SchedulerResult};
use crate::planner::{PlanParams, Planner};
use crate::request::{ClearRequest, PrepareOutcome, PrepareRequest, SubmitRequest};

/// Work-queue scheduler over a `StateStore`.
#[derive(Clone)]
pub struct Scheduler {
    state: StateStore,
    settings: SchedulerSettings,
}

impl Scheduler {
    /// Create a scheduler. The store's bulk-write chunk size is taken from
    /// `settings.batch_limit`.
    pub fn new(state: StateStore, settings: SchedulerSettings) -> Self {
        Self {
            state: state.with_batch_limit(settings.batch_limit),
            settings,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Plan the demand described by `request` and enqueue the resulting
    /// work units.
    ///
    /// Not idempotent: with `net_queued_demand` disabled, repeating a call
    /// before the queue drains enqueues the same demand again.
    pub fn prepare(&self, request: PrepareRequest) -> SchedulerResult<PrepareOutcome> {
        let per_unit = request.per_unit.unwrap_or(self.settings.default_per_unit);
        let channel_type = request
            .channel_type
            .clone()
            .unwrap_or_else(|| self.settings.default_channel_type.clone());
        validate_target(&request.snr_range, request.required_messages, per_unit)?;
        simq_core::validate_segment("channel_type", &channel_type)
            .map_err(|e| SchedulerError::Validation(e.to_string()))?;

        let selection = self.resolve_selection(&request)?;
        let params = PlanParams {
            snr_range: &request.snr_range,
            required_messages: request.required_messages,
            per_unit,
            channel_type: &channel_type,
        };
        let plan = Planner::new(&self.state, &self.state)
            .final_unit(self.settings.final_unit)
            .net_queued_demand(self.settings.net_queued_demand)
            .max_units(self.settings.max_units_per_prepare)
            .plan(&selection, &params)?;

        let report = self.state.enqueue_all(&plan.units)?;
        info!(
            units = report.units,
            chunks = report.chunks,
            messages = plan.total_messages(),
            skipped = plan.skipped.len(),
            %channel_type,
            "experiments prepared"
        );
        Ok(PrepareOutcome {
            experiments: report.units,
            chunks: report.chunks,
            skipped: plan.skipped,
        })
    }

    /// Take the next work unit off the queue, or `None` if there is none.
    pub fn fetch_work(&self) -> SchedulerResult<Option<WorkUnit>> {
        let unit = self.state.dequeue_one()?;
        if unit.is_none() {
            debug!("work queue empty");
        }
        Ok(unit)
    }

    /// Append a worker's result to the ledger. Returns the ledger sequence
    /// number.
    ///
    /// Every call adds a record; submitting the same result twice counts it
    /// twice.
    pub fn submit_result(&self, request: SubmitRequest) -> SchedulerResult<u64> {
        let SubmitRequest {
            route_params,
            result,
        } = request;
        let experiment = ExperimentRecord {
            code_id: route_params.code_id,
            code_type: route_params.code_type,
            channel_type: route_params
                .channel_type
                .unwrap_or_else(|| self.settings.default_channel_type.clone()),
            snr: result.snr,
            frames: result.frames,
            recorded_at: epoch_secs(),
            extra: result.extra,
        };
        experiment
            .triple()
            .validate()
            .map_err(|e| SchedulerError::Validation(e.to_string()))?;

        let seq = self.state.record(&experiment)?;
        info!(triple = %experiment.triple(), frames = experiment.frames, seq, "result saved");
        Ok(seq)
    }

    /// Clear each named collection and report how many entries were removed.
    ///
    /// All names are checked before anything is deleted.
    pub fn clear(&self, request: ClearRequest) -> SchedulerResult<BTreeMap<String, u64>> {
        if request.collections.is_empty() {
            return Err(SchedulerError::Validation(
                "collections must name at least one collection".to_string(),
            ));
        }
        for name in &request.collections {
            Collection::parse(name)?;
        }

        let mut deleted = BTreeMap::new();
        for name in request.collections {
            let count = self.state.clear(&name)?;
            deleted.insert(name, count);
        }
        Ok(deleted)
    }

    /// Units and messages currently queued.
    pub fn status(&self) -> SchedulerResult<QueueDepth> {
        Ok(self.state.queue_depth()?)
    }

    /// Messages recorded for a triple.
    pub fn completed(&self, triple: &TripleKey) -> SchedulerResult<u64> {
        Ok(self.state.completed(triple)?)
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Explicit `codes` win; otherwise select catalog codes by length.
    fn resolve_selection(&self, request: &PrepareRequest) -> SchedulerResult<CodeSelection> {
        if let Some(codes) = &request.codes {
            for (code_type, code_id) in codes.pairs() {
                simq_core::validate_segment("code_type", code_type)
                    .and_then(|()| simq_core::validate_segment("code_id", code_id))
                    .map_err(|e| SchedulerError::Validation(e.to_string()))?;
            }
            return Ok(codes.clone());
        }

        let Some(lengths) = &request.code_lengths else {
            return Err(SchedulerError::Validation(
                "one of `codes` or `code_lengths` is required".to_string(),
            ));
        };
        let code_types = request
            .code_types
            .as_ref()
            .unwrap_or(&self.settings.code_types);

        let mut selection = CodeSelection::default();
        for code_type in code_types {
            let ids = self
                .state
                .list_codes(code_type, lengths)?
                .into_iter()
                .map(|code| code.code_id)
                .collect();
            selection.push(code_type.clone(), ids);
        }
        Ok(selection)
    }
}

fn validate_target(snr_range: &[f64], required_messages: u64, per_unit: u64) -> SchedulerResult<()> {
    if snr_range.is_empty() {
        return Err(SchedulerError::Validation(
            "snr_range must not be empty".to_string(),
        ));
    }
    if let Some(snr) = snr_range.iter().find(|snr| !snr.is_finite()) {
        return Err(SchedulerError::Validation(format!(
            "snr_range contains a non-finite value: {snr}"
        )));
    }
    for (i, snr) in snr_range.iter().enumerate() {
        if snr_range[..i].contains(snr) {
            return Err(SchedulerError::Validation(format!(
                "snr_range lists {snr} more than once"
            )));
        }
    }
    if required_messages == 0 {
        return Err(SchedulerError::Validation(
            "required_messages must be at least 1".to_string(),
        ));
    }
    if per_unit == 0 {
        return Err(SchedulerError::Validation(
            "per_unit must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Current Unix epoch in seconds.
fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use serde_json::json;
    use simq_core::{CodeRecord, FinalUnitPolicy, Params};
    use simq_state::StateError;

    use crate::request::{ResultFields, RouteParams};

    fn test_state() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    fn put_code(state: &StateStore, code_type: &str, code_id: &str, n: u32) {
        let mut params = Params::new();
        params.insert("design_snr".to_string(), json!(2.0));
        state
            .put_code(&CodeRecord {
                code_id: code_id.to_string(),
                code_type: code_type.to_string(),
                n,
                params,
            })
            .unwrap();
    }

    fn scheduler_with(state: StateStore, net_queued_demand: bool) -> Scheduler {
        let settings = SchedulerSettings {
            net_queued_demand,
            ..SchedulerSettings::default()
        };
        Scheduler::new(state, settings)
    }

    fn prepare_request(code_id: &str, snr_range: Vec<f64>, required: u64, per_unit: u64) -> PrepareRequest {
        let mut codes = CodeSelection::default();
        codes.push("fast-ssc", vec![code_id.to_string()]);
        PrepareRequest {
            codes: Some(codes),
            snr_range,
            required_messages: required,
            per_unit: Some(per_unit),
            ..PrepareRequest::default()
        }
    }

    fn submit(code_id: &str, snr: f64, frames: u64) -> SubmitRequest {
        SubmitRequest {
            route_params: RouteParams {
                code_type: "fast-ssc".to_string(),
                code_id: code_id.to_string(),
                channel_type: Some("simple-bpsk".to_string()),
            },
            result: ResultFields {
                frames,
                snr,
                extra: Params::new(),
            },
        }
    }

    fn bpsk(code_id: &str, snr: f64) -> TripleKey {
        TripleKey::new("fast-ssc", code_id, "simple-bpsk", snr)
    }

    #[test]
    fn scheduler_applies_batch_limit_to_store() {
        let settings = SchedulerSettings {
            batch_limit: 7,
            ..SchedulerSettings::default()
        };
        let scheduler = Scheduler::new(test_state(), settings);
        assert_eq!(scheduler.state().batch_limit(), 7);
    }

    #[test]
    fn prepare_scenario_enqueues_four_units() {
        let state = test_state();
        put_code(&state, "fast-ssc", "c1", 256);
        let scheduler = scheduler_with(state, false);
        scheduler.submit_result(submit("c1", 1.0, 900)).unwrap();

        let outcome = scheduler
            .prepare(prepare_request("c1", vec![1.0, 2.0], 1000, 400))
            .unwrap();
        assert_eq!(outcome.experiments, 4);
        assert_eq!(outcome.chunks, 1);

        let mut snrs = Vec::new();
        while let Some(unit) = scheduler.fetch_work().unwrap() {
            assert_eq!(unit.messages_requested, 400);
            assert_eq!(unit.params.get("design_snr"), Some(&json!(2.0)));
            snrs.push(unit.snr);
        }
        assert_eq!(snrs, vec![1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn prepare_without_netting_duplicates_demand() {
        let state = test_state();
        put_code(&state, "fast-ssc", "c1", 64);
        let scheduler = scheduler_with(state, false);

        let req = prepare_request("c1", vec![1.0], 100, 50);
        assert_eq!(scheduler.prepare(req.clone()).unwrap().experiments, 2);
        assert_eq!(scheduler.prepare(req).unwrap().experiments, 2);
        assert_eq!(scheduler.status().unwrap().units, 4);
    }

    #[test]
    fn prepare_with_netting_skips_queued_demand() {
        let state = test_state();
        put_code(&state, "fast-ssc", "c1", 64);
        let scheduler = scheduler_with(state, true);

        let req = prepare_request("c1", vec![1.0], 100, 50);
        assert_eq!(scheduler.prepare(req.clone()).unwrap().experiments, 2);
        assert_eq!(scheduler.prepare(req.clone()).unwrap().experiments, 0);

        // A fetched-but-unreported unit no longer counts as queued.
        scheduler.fetch_work().unwrap().unwrap();
        assert_eq!(scheduler.prepare(req).unwrap().experiments, 1);
    }

    #[test]
    fn results_retire_demand() {
        let state = test_state();
        put_code(&state, "fast-ssc", "c1", 64);
        let scheduler = scheduler_with(state, true);
        let req = prepare_request("c1", vec![1.0], 300, 100);

        assert_eq!(scheduler.prepare(req.clone()).unwrap().experiments, 3);
        while let Some(unit) = scheduler.fetch_work().unwrap() {
            scheduler
                .submit_result(submit(&unit.code_id, unit.snr, unit.messages_requested))
                .unwrap();
        }

        assert_eq!(scheduler.completed(&bpsk("c1", 1.0)).unwrap(), 300);
        assert_eq!(scheduler.prepare(req).unwrap().experiments, 0);
    }

    #[test]
    fn submit_accumulates() {
        let scheduler = scheduler_with(test_state(), true);
        scheduler.submit_result(submit("c1", 1.0, 100)).unwrap();
        scheduler.submit_result(submit("c1", 1.0, 250)).unwrap();
        assert_eq!(scheduler.completed(&bpsk("c1", 1.0)).unwrap(), 350);
    }

    #[test]
    fn submit_defaults_channel_type() {
        let scheduler = scheduler_with(test_state(), true);
        let mut req = submit("c1", 1.0, 10);
        req.route_params.channel_type = None;
        scheduler.submit_result(req).unwrap();
        assert_eq!(scheduler.completed(&bpsk("c1", 1.0)).unwrap(), 10);
    }

    #[test]
    fn submit_rejects_bad_routing() {
        let scheduler = scheduler_with(test_state(), true);
        let mut req = submit("c1", 1.0, 10);
        req.route_params.code_id = "a/b".to_string();
        let err = scheduler.submit_result(req).unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
        assert!(err.is_client_error());
    }

    #[test]
    fn prepare_selects_codes_by_length() {
        let state = test_state();
        put_code(&state, "fast-ssc", "short", 64);
        put_code(&state, "fast-ssc", "long", 1024);
        put_code(&state, "rc_scan", "r1", 64);
        let scheduler = scheduler_with(state, true);

        let req = PrepareRequest {
            code_lengths: Some(vec![64]),
            snr_range: vec![1.0],
            required_messages: 10,
            per_unit: Some(10),
            ..PrepareRequest::default()
        };
        assert_eq!(scheduler.prepare(req).unwrap().experiments, 2);

        let mut ids = HashSet::new();
        while let Some(unit) = scheduler.fetch_work().unwrap() {
            ids.insert(unit.code_id);
        }
        assert_eq!(ids, HashSet::from(["short".to_string(), "r1".to_string()]));
    }

    #[test]
    fn prepare_with_empty_lengths_and_explicit_types() {
        let state = test_state();
        put_code(&state, "fast-ssc", "a", 64);
        put_code(&state, "fast-ssc", "b", 128);
        put_code(&state, "rc_scan", "r1", 64);
        let scheduler = scheduler_with(state, true);

        let req = PrepareRequest {
            code_types: Some(vec!["fast-ssc".to_string()]),
            code_lengths: Some(vec![]),
            snr_range: vec![1.0],
            required_messages: 10,
            per_unit: Some(10),
            ..PrepareRequest::default()
        };
        assert_eq!(scheduler.prepare(req).unwrap().experiments, 2);
    }

    #[test]
    fn prepare_reports_skipped_codes() {
        let state = test_state();
        put_code(&state, "fast-ssc", "c1", 64);
        let scheduler = scheduler_with(state, true);

        let mut req = prepare_request("c1", vec![1.0], 10, 10);
        req.codes
            .as_mut()
            .unwrap()
            .push("rc_scan", vec!["ghost".to_string()]);
        let outcome = scheduler.prepare(req).unwrap();
        assert_eq!(outcome.experiments, 1);
        assert_eq!(outcome.skipped, vec!["rc_scan/ghost"]);
    }

    #[test]
    fn prepare_validation_errors() {
        let scheduler = scheduler_with(test_state(), true);

        let cases = [
            prepare_request("c1", vec![], 10, 10),
            prepare_request("c1", vec![1.0, f64::NAN], 10, 10),
            prepare_request("c1", vec![1.0, 1.0], 10, 10),
            prepare_request("c1", vec![1.0], 0, 10),
            prepare_request("c1", vec![1.0], 10, 0),
            PrepareRequest {
                snr_range: vec![1.0],
                required_messages: 10,
                ..PrepareRequest::default()
            },
            PrepareRequest {
                channel_type: Some("a/b".to_string()),
                ..prepare_request("c1", vec![1.0], 10, 10)
            },
        ];
        for req in cases {
            let err = scheduler.prepare(req.clone()).unwrap_err();
            assert!(
                matches!(err, SchedulerError::Validation(_)),
                "{req:?} gave {err:?}"
            );
        }
        assert_eq!(scheduler.status().unwrap(), QueueDepth::default());
    }

    #[test]
    fn prepare_uses_default_per_unit() {
        let state = test_state();
        put_code(&state, "fast-ssc", "c1", 64);
        let settings = SchedulerSettings {
            default_per_unit: 250,
            final_unit: FinalUnitPolicy::ExactRemainder,
            ..SchedulerSettings::default()
        };
        let scheduler = Scheduler::new(state, settings);

        let mut req = prepare_request("c1", vec![1.0], 600, 1);
        req.per_unit = None;
        assert_eq!(scheduler.prepare(req).unwrap().experiments, 3);
        assert_eq!(scheduler.status().unwrap().messages, 600);
    }

    #[test]
    fn prepare_over_unit_cap_enqueues_nothing() {
        let state = test_state();
        put_code(&state, "fast-ssc", "c1", 64);
        let settings = SchedulerSettings {
            max_units_per_prepare: 10,
            ..SchedulerSettings::default()
        };
        let scheduler = Scheduler::new(state, settings);

        let err = scheduler
            .prepare(prepare_request("c1", vec![1.0], 1_000_000_000_000, 1))
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
        assert_eq!(scheduler.status().unwrap(), QueueDepth::default());

        assert_eq!(
            scheduler
                .prepare(prepare_request("c1", vec![1.0], 100, 10))
                .unwrap()
                .experiments,
            10
        );
    }

    #[test]
    fn code_params_cannot_shadow_unit_fields() {
        let state = test_state();
        let mut params = Params::new();
        params.insert("snr".to_string(), json!(3.0));
        params.insert("messages_requested".to_string(), json!(1));
        params.insert("K".to_string(), json!(32));
        state
            .put_code(&CodeRecord {
                code_id: "c1".to_string(),
                code_type: "fast-ssc".to_string(),
                n: 64,
                params,
            })
            .unwrap();
        let scheduler = scheduler_with(state, true);

        scheduler
            .prepare(prepare_request("c1", vec![1.0], 10, 10))
            .unwrap();
        let unit = scheduler.fetch_work().unwrap().unwrap();
        assert_eq!(unit.snr, 1.0);
        assert_eq!(unit.messages_requested, 10);
        assert_eq!(unit.params.get("K"), Some(&json!(32)));
        assert!(scheduler.fetch_work().unwrap().is_none());
        assert_eq!(scheduler.status().unwrap(), QueueDepth::default());
    }

    #[test]
    fn fetch_from_empty_queue_is_none() {
        let scheduler = scheduler_with(test_state(), true);
        assert!(scheduler.fetch_work().unwrap().is_none());
    }

    #[test]
    fn clear_reports_counts_per_collection() {
        let state = test_state();
        put_code(&state, "fast-ssc", "c1", 64);
        let scheduler = scheduler_with(state, true);
        scheduler
            .prepare(prepare_request("c1", vec![1.0, 2.0], 30, 10))
            .unwrap();
        scheduler.submit_result(submit("c1", 3.0, 5)).unwrap();

        let deleted = scheduler
            .clear(ClearRequest {
                collections: vec!["prepared".to_string(), "experiments".to_string()],
            })
            .unwrap();
        assert_eq!(deleted.get("prepared"), Some(&6));
        assert_eq!(deleted.get("experiments"), Some(&1));
        assert!(scheduler.fetch_work().unwrap().is_none());
    }

    #[test]
    fn clear_checks_every_name_first() {
        let state = test_state();
        put_code(&state, "fast-ssc", "c1", 64);
        let scheduler = scheduler_with(state, true);
        scheduler
            .prepare(prepare_request("c1", vec![1.0], 10, 10))
            .unwrap();

        let err = scheduler
            .clear(ClearRequest {
                collections: vec!["prepared".to_string(), "nope".to_string()],
            })
            .unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::State(StateError::UnknownCollection(_))
        ));
        assert_eq!(scheduler.status().unwrap().units, 1);

        let err = scheduler.clear(ClearRequest::default()).unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(_)));
    }

    #[test]
    fn epoch_secs_returns_reasonable_value() {
        let now = epoch_secs();
        // Should be after 2024-01-01.
        assert!(now > 1_704_067_200);
    }
}
