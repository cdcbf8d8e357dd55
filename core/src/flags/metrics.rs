//! Evaluation counters
//!
//! Every `is_enabled` call reports `(flag, enabled)` to an [`EvaluationRecorder`].
//! Recording must never block the caller for long or fail the evaluation.

use std::collections::BTreeMap;

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

use crate::errors::{Result, TimetravelError};

/// Counter name as exposed to scrapers
pub const EVALUATIONS_METRIC: &str = "feature_flag_evaluations_total";

/// Sink for flag evaluation outcomes
pub trait EvaluationRecorder: Send + Sync {
    fn record(&self, flag: &str, enabled: bool);
}

/// Discards every evaluation
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl EvaluationRecorder for NoopRecorder {
    fn record(&self, _flag: &str, _enabled: bool) {}
}

fn enabled_label(enabled: bool) -> &'static str {
    if enabled { "true" } else { "false" }
}

/// Prometheus counter labelled by `flag` and `enabled`
///
/// Each instance owns its registry, so engines built side by side (tests,
/// several databases in one process) never share counts.
#[derive(Clone)]
pub struct FlagEvaluationCounters {
    registry: Registry,
    evaluations: IntCounterVec,
}

impl FlagEvaluationCounters {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let evaluations = IntCounterVec::new(
            Opts::new(EVALUATIONS_METRIC, "Feature flag evaluations by outcome"),
            &["flag", "enabled"],
        )?;
        registry.register(Box::new(evaluations.clone()))?;
        Ok(Self {
            registry,
            evaluations,
        })
    }

    /// Registry holding the evaluation counter, for callers that expose it
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Evaluations of `flag` that returned `enabled`
    pub fn count(&self, flag: &str, enabled: bool) -> u64 {
        self.snapshot()
            .get(&(flag.to_string(), enabled))
            .copied()
            .unwrap_or(0)
    }

    /// All counters, ordered by flag then outcome
    pub fn snapshot(&self) -> BTreeMap<(String, bool), u64> {
        let mut counts = BTreeMap::new();
        for family in self.registry.gather() {
            if family.get_name() != EVALUATIONS_METRIC {
                continue;
            }
            for metric in family.get_metric() {
                let mut flag = None;
                let mut enabled = None;
                for label in metric.get_label() {
                    match label.get_name() {
                        "flag" => flag = Some(label.get_value().to_string()),
                        "enabled" => enabled = Some(label.get_value() == "true"),
                        _ => {}
                    }
                }
                if let (Some(flag), Some(enabled)) = (flag, enabled) {
                    // Integer counters are exported as f64 holding whole values.
                    counts.insert((flag, enabled), metric.get_counter().get_value() as u64);
                }
            }
        }
        counts
    }

    /// Prometheus text exposition of the registry
    pub fn render_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer)
            .map_err(|e| TimetravelError::metrics_with_source("metrics text is not UTF-8", e))
    }
}

impl EvaluationRecorder for FlagEvaluationCounters {
    fn record(&self, flag: &str, enabled: bool) {
        self.evaluations
            .with_label_values(&[flag, enabled_label(enabled)])
            .inc();
    }
}

impl std::fmt::Debug for FlagEvaluationCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagEvaluationCounters")
            .field("series", &self.snapshot().len())
            .finish()
    }
}
