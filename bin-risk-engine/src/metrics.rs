//! Metrics collection for observability
//!
//! Prometheus metrics for the risk engine. Every engine owns a private
//! registry so several engines (and tests) can coexist in one process.
//!
//! # Metrics
//!
//! - `bin_risk_evaluations_total{risk_class}` - Evaluations by decision class
//! - `bin_risk_evaluation_duration_seconds` - Evaluation latency
//! - `bin_risk_extractor_degraded_total{extractor}` - Extractor fallbacks
//! - `bin_risk_pattern_failures_total` - Patterns excluded from matching
//! - `bin_risk_pattern_cache_refreshes_total{outcome}` - Pattern loads
//! - `bin_risk_mitigations_total{action,outcome}` - Mitigation calls
//! - `bin_risk_persistence_failures_total` - Audit writes that failed
//! - `bin_risk_catastrophic_total` - Evaluations answered with the neutral fallback

use crate::Result;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Evaluations by class
    pub evaluations_total: IntCounterVec,

    /// Evaluation duration histogram
    pub evaluation_duration: Histogram,

    /// Extractor fallbacks by extractor
    pub extractor_degraded: IntCounterVec,

    /// Patterns excluded from matching
    pub pattern_failures: IntCounter,

    /// Pattern cache loads by outcome
    pub pattern_refreshes: IntCounterVec,

    /// Mitigation calls by action and outcome
    pub mitigations: IntCounterVec,

    /// Failed audit writes
    pub persistence_failures: IntCounter,

    /// Neutral fallbacks after an unexpected fault
    pub catastrophic_total: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let evaluations_total = IntCounterVec::new(
            Opts::new("bin_risk_evaluations_total", "Risk evaluations by decision class"),
            &["risk_class"],
        )?;
        registry.register(Box::new(evaluations_total.clone()))?;

        let evaluation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "bin_risk_evaluation_duration_seconds",
                "Risk evaluation latency",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(evaluation_duration.clone()))?;

        let extractor_degraded = IntCounterVec::new(
            Opts::new(
                "bin_risk_extractor_degraded_total",
                "Feature extractors that fell back to their default record",
            ),
            &["extractor"],
        )?;
        registry.register(Box::new(extractor_degraded.clone()))?;

        let pattern_failures = IntCounter::with_opts(Opts::new(
            "bin_risk_pattern_failures_total",
            "Patterns excluded from matching after an evaluation error",
        ))?;
        registry.register(Box::new(pattern_failures.clone()))?;

        let pattern_refreshes = IntCounterVec::new(
            Opts::new(
                "bin_risk_pattern_cache_refreshes_total",
                "Pattern cache loads by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(pattern_refreshes.clone()))?;

        let mitigations = IntCounterVec::new(
            Opts::new("bin_risk_mitigations_total", "Mitigation calls by action and outcome"),
            &["action", "outcome"],
        )?;
        registry.register(Box::new(mitigations.clone()))?;

        let persistence_failures = IntCounter::with_opts(Opts::new(
            "bin_risk_persistence_failures_total",
            "Audit writes that failed or timed out",
        ))?;
        registry.register(Box::new(persistence_failures.clone()))?;

        let catastrophic_total = IntCounter::with_opts(Opts::new(
            "bin_risk_catastrophic_total",
            "Evaluations answered with the neutral fallback",
        ))?;
        registry.register(Box::new(catastrophic_total.clone()))?;

        Ok(Self {
            evaluations_total,
            evaluation_duration,
            extractor_degraded,
            pattern_failures,
            pattern_refreshes,
            mitigations,
            persistence_failures,
            catastrophic_total,
            registry,
        })
    }

    /// Record a finished evaluation
    pub fn record_evaluation(&self, risk_class: &str, duration_seconds: f64) {
        self.evaluations_total.with_label_values(&[risk_class]).inc();
        self.evaluation_duration.observe(duration_seconds);
    }

    /// Record an extractor fallback
    pub fn record_degraded(&self, extractor: &str) {
        self.extractor_degraded.with_label_values(&[extractor]).inc();
    }

    /// Record patterns excluded from a matching pass
    pub fn record_pattern_failures(&self, count: usize) {
        self.pattern_failures.inc_by(count as u64);
    }

    /// Record a pattern cache load
    pub fn record_refresh(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.pattern_refreshes.with_label_values(&[outcome]).inc();
    }

    /// Record a mitigation call
    pub fn record_mitigation(&self, action: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.mitigations.with_label_values(&[action, outcome]).inc();
    }

    /// Record a failed audit write
    pub fn record_persistence_failure(&self) {
        self.persistence_failures.inc();
    }

    /// Record a neutral fallback
    pub fn record_catastrophic(&self) {
        self.catastrophic_total.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in the Prometheus text format
    pub fn gather_text(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();

        a.record_evaluation("flagged", 0.002);
        a.record_degraded("velocity");

        assert_eq!(a.evaluations_total.with_label_values(&["flagged"]).get(), 1);
        assert_eq!(b.evaluations_total.with_label_values(&["flagged"]).get(), 0);
    }

    #[test]
    fn test_gather_text() {
        let metrics = Metrics::new().unwrap();
        metrics.record_mitigation("block", true);

        let text = metrics.gather_text().unwrap();
        assert!(text.contains("bin_risk_mitigations_total"));
    }
}
