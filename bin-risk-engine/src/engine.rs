//! Risk engine
//!
//! One engine instance owns the extractors, the pattern cache and the
//! scorers. An evaluation runs the four extractors concurrently, scores the
//! bundle, and hands the result to the decision controller.

use crate::composite::CompositeScorer;
use crate::config::EngineConfig;
use crate::decision::DecisionController;
use crate::ensemble::ModelEnsemble;
use crate::features::{
    names, run_extractor, BehavioralExtractor, FeatureBundle, FeatureExtractor,
    GeographicExtractor, TechnicalExtractor, VelocityExtractor,
};
use crate::metrics::Metrics;
use crate::patterns::{PatternCache, PatternMatcher, PatternSet};
use crate::store::{AuditStore, EventStore, PatternRepository, SessionController};
use crate::types::{RequestContext, RiskAssessment, RiskEvaluationRequest};
use crate::{Error, Result};
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

/// Real-time risk engine for BIN lookups
pub struct RiskEngine {
    config: EngineConfig,
    events: Arc<dyn EventStore>,
    velocity: VelocityExtractor,
    geographic: GeographicExtractor,
    behavioral: BehavioralExtractor,
    technical: TechnicalExtractor,
    patterns: PatternCache,
    matcher: PatternMatcher,
    ensemble: ModelEnsemble,
    composite: CompositeScorer,
    decision: DecisionController,
    metrics: Metrics,
}

/// Bundle and assessment of a finished scoring pass
struct Scored {
    bundle: FeatureBundle,
    assessment: RiskAssessment,
}

impl RiskEngine {
    /// Create engine over its collaborators
    pub fn new(
        config: EngineConfig,
        events: Arc<dyn EventStore>,
        patterns: Arc<dyn PatternRepository>,
        sessions: Arc<dyn SessionController>,
        audit: Arc<dyn AuditStore>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = Metrics::new()?;

        info!(
            service = %config.service_name,
            extractor_timeout_ms = config.extraction.timeout_ms,
            pattern_ttl_secs = config.patterns.cache_ttl_secs,
            pattern_load_timeout_ms = config.patterns.load_timeout_ms,
            "Initializing risk engine"
        );

        Ok(Self {
            velocity: VelocityExtractor::new(&config.extraction),
            geographic: GeographicExtractor::new(&config.extraction, &config.signals),
            behavioral: BehavioralExtractor::new(&config.extraction, &config.signals),
            technical: TechnicalExtractor::new(&config.signals),
            patterns: PatternCache::new(
                patterns,
                config.patterns.ttl(),
                config.patterns.load_timeout(),
                metrics.clone(),
            ),
            matcher: PatternMatcher::new(),
            ensemble: ModelEnsemble::new(&config.ensemble),
            composite: CompositeScorer::new(&config.composite),
            decision: DecisionController::new(
                &config.decision,
                &config.audit,
                sessions,
                audit,
                metrics.clone(),
            ),
            events,
            metrics,
            config,
        })
    }

    /// Replace the model ensemble
    pub fn with_ensemble(mut self, ensemble: ModelEnsemble) -> Self {
        self.ensemble = ensemble;
        self
    }

    /// Evaluate a lookup. Never fails; a fault anywhere in scoring yields a
    /// neutral moderate-risk, low-confidence assessment.
    ///
    /// Dropping the returned future before it completes persists nothing.
    pub async fn evaluate(&self, request: RiskEvaluationRequest) -> RiskAssessment {
        let ctx = RequestContext::from(request);
        let span = info_span!("risk_evaluation", session_id = %ctx.session_id, bin = %ctx.bin);

        async {
            let started = Instant::now();
            let scored = self.score(&ctx).await;
            self.finish(&ctx, scored, started).await
        }
        .instrument(span)
        .await
    }

    /// Evaluate a lookup unless `cancel` fires first.
    ///
    /// On cancellation in-flight store queries are dropped and nothing is
    /// persisted.
    pub async fn evaluate_cancellable(
        &self,
        request: RiskEvaluationRequest,
        cancel: CancellationToken,
    ) -> Result<RiskAssessment> {
        let ctx = RequestContext::from(request);
        let span = info_span!("risk_evaluation", session_id = %ctx.session_id, bin = %ctx.bin);

        async {
            let started = Instant::now();
            let scored = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                scored = self.score(&ctx) => Some(scored),
            };

            match scored {
                Some(scored) if !cancel.is_cancelled() => Ok(self.finish(&ctx, scored, started).await),
                _ => {
                    info!("Evaluation cancelled, discarding partial results");
                    Err(Error::Cancelled)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Extract and score, catching any fault escaping the pipeline
    async fn score(&self, ctx: &RequestContext) -> Scored {
        let pipeline = async {
            let bundle = self.extract(ctx).await;
            let patterns = self.patterns.patterns().await;
            let assessment = self.assess(ctx, &bundle, &patterns);
            Scored { bundle, assessment }
        };

        match AssertUnwindSafe(pipeline).catch_unwind().await {
            Ok(scored) => scored,
            Err(panic) => {
                let err = Error::Catastrophic(panic_message(panic.as_ref()));
                self.metrics.record_catastrophic();
                error!(error = %err, "Risk evaluation failed, returning neutral assessment");

                let bundle = self.fallback_bundle(ctx);
                let assessment = self.decision.neutral(&bundle, ctx.timestamp);
                Scored { bundle, assessment }
            }
        }
    }

    /// Run all four extractors concurrently, each under its own budget
    pub async fn extract(&self, ctx: &RequestContext) -> FeatureBundle {
        let timeout = self.config.extraction.timeout();
        let store = self.events.as_ref();

        let (velocity, geographic, behavioral, technical) = tokio::join!(
            run_extractor(&self.velocity, ctx, store, timeout),
            run_extractor(&self.geographic, ctx, store, timeout),
            run_extractor(&self.behavioral, ctx, store, timeout),
            run_extractor(&self.technical, ctx, store, timeout),
        );

        let degraded: Vec<String> = [
            (names::VELOCITY, velocity.degraded),
            (names::GEOGRAPHIC, geographic.degraded),
            (names::BEHAVIORAL, behavioral.degraded),
            (names::TECHNICAL, technical.degraded),
        ]
        .into_iter()
        .filter(|(_, degraded)| *degraded)
        .map(|(name, _)| {
            self.metrics.record_degraded(name);
            name.to_string()
        })
        .collect();

        FeatureBundle {
            velocity: velocity.value,
            geographic: geographic.value,
            behavioral: behavioral.value,
            technical: technical.value,
            degraded,
        }
    }

    fn fallback_bundle(&self, ctx: &RequestContext) -> FeatureBundle {
        FeatureBundle {
            velocity: self.velocity.fallback(ctx),
            geographic: self.geographic.fallback(ctx),
            behavioral: self.behavioral.fallback(ctx),
            technical: self.technical.fallback(ctx),
            degraded: [names::VELOCITY, names::GEOGRAPHIC, names::BEHAVIORAL, names::TECHNICAL]
                .iter()
                .map(|n| n.to_string())
                .collect(),
        }
    }

    /// Score a feature bundle against a pattern set. Pure.
    pub fn assess(
        &self,
        ctx: &RequestContext,
        bundle: &FeatureBundle,
        patterns: &PatternSet,
    ) -> RiskAssessment {
        let pattern_score = self.matcher.evaluate_all(patterns, bundle);
        if pattern_score.failed > 0 {
            self.metrics.record_pattern_failures(pattern_score.failed);
        }

        let ml = self.ensemble.score(bundle);
        debug!(
            pattern_score = ?pattern_score.score,
            ml_score = ml.score,
            ml_confidence = ml.confidence,
            participants = ?ml.participants,
            "Component scores"
        );

        let composite = self.composite.score(bundle, &pattern_score, &ml);
        self.decision.decide(composite, ctx.timestamp)
    }

    async fn finish(&self, ctx: &RequestContext, scored: Scored, started: Instant) -> RiskAssessment {
        let Scored { bundle, assessment } = scored;
        let record = self.decision.detection_record(ctx, &assessment, bundle);

        if self.config.audit.background {
            let decision = self.decision.clone();
            tokio::spawn(async move {
                decision.enforce(record).await;
            });
        } else {
            self.decision.enforce(record).await;
        }

        self.metrics
            .record_evaluation(assessment.risk_class.as_str(), started.elapsed().as_secs_f64());
        info!(
            risk_score = assessment.risk_score.score(),
            confidence = assessment.confidence,
            risk_class = assessment.risk_class.as_str(),
            is_blocked = assessment.is_blocked,
            "Risk evaluation complete"
        );

        assessment
    }

    /// Pattern cache shared by every evaluation
    pub fn pattern_cache(&self) -> &PatternCache {
        &self.patterns
    }

    /// Engine metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl std::fmt::Debug for RiskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskEngine")
            .field("service", &self.config.service_name)
            .field("patterns", &self.patterns)
            .field("ensemble", &self.ensemble)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
