//! Decision and mitigation
//!
//! Turns a composite score into a classified [`RiskAssessment`], then
//! persists the detection record and applies mitigation. Every side effect
//! fails open: errors and timeouts are logged and counted, never returned.

use crate::composite::CompositeScore;
use crate::config::{AuditConfig, DecisionConfig};
use crate::features::FeatureBundle;
use crate::metrics::Metrics;
use crate::store::{AuditStore, SessionController};
use crate::types::{
    ActionKind, AutomationAction, ComponentBreakdown, DetectionRecord, Recommendation,
    RequestContext, RiskAssessment, RiskClass, RiskScore,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Classifies scores and applies side effects
#[derive(Clone)]
pub struct DecisionController {
    config: DecisionConfig,
    audit_config: AuditConfig,
    sessions: Arc<dyn SessionController>,
    audit: Arc<dyn AuditStore>,
    metrics: Metrics,
}

impl DecisionController {
    /// Create controller
    pub fn new(
        config: &DecisionConfig,
        audit_config: &AuditConfig,
        sessions: Arc<dyn SessionController>,
        audit: Arc<dyn AuditStore>,
        metrics: Metrics,
    ) -> Self {
        Self {
            config: config.clone(),
            audit_config: audit_config.clone(),
            sessions,
            audit,
            metrics,
        }
    }

    /// Decision class of a rounded score
    pub fn classify(&self, score: RiskScore) -> RiskClass {
        let s = score.score();
        let c = &self.config;
        if s >= c.block_threshold {
            RiskClass::Blocked
        } else if s >= c.flag_threshold {
            RiskClass::Flagged
        } else if s >= c.caution_threshold {
            RiskClass::Caution
        } else if s >= c.normal_threshold {
            RiskClass::Normal
        } else {
            RiskClass::LowRisk
        }
    }

    /// Recommendations for a class, with the low-confidence caveat if needed
    pub fn recommendations(&self, class: RiskClass, confidence: f64) -> Vec<Recommendation> {
        let mut recs = match class {
            RiskClass::Blocked => vec![Recommendation::Reject, Recommendation::ManualReview],
            RiskClass::Flagged => vec![
                Recommendation::AdditionalVerification,
                Recommendation::IncreaseMonitoring,
            ],
            RiskClass::Caution => vec![Recommendation::HeightenedMonitoring],
            RiskClass::Normal => vec![Recommendation::StandardProcessing],
            RiskClass::LowRisk => vec![Recommendation::Proceed],
        };

        if confidence < self.config.low_confidence_threshold {
            recs.push(Recommendation::LowConfidenceReview);
        }
        recs
    }

    /// Classify a composite score
    pub fn decide(&self, composite: CompositeScore, assessed_at: DateTime<Utc>) -> RiskAssessment {
        let risk_score = RiskScore::from_composite(composite.score);
        let confidence = composite.confidence.clamp(0.0, 1.0);
        let risk_class = self.classify(risk_score);

        RiskAssessment {
            risk_score,
            composite_score: composite.score,
            confidence,
            risk_class,
            risk_factors: composite.risk_factors,
            recommendations: self.recommendations(risk_class, confidence),
            is_blocked: risk_score.score() >= self.config.block_threshold,
            breakdown: composite.breakdown,
            assessed_at,
        }
    }

    /// Moderate-risk, low-confidence answer used after an unexpected fault
    pub fn neutral(&self, bundle: &FeatureBundle, assessed_at: DateTime<Utc>) -> RiskAssessment {
        let risk_score = RiskScore::new(50);
        let confidence = 0.1;
        let risk_class = self.classify(risk_score);

        RiskAssessment {
            risk_score,
            composite_score: 50.0,
            confidence,
            risk_class,
            risk_factors: Vec::new(),
            recommendations: self.recommendations(risk_class, confidence),
            is_blocked: risk_score.score() >= self.config.block_threshold,
            breakdown: ComponentBreakdown {
                pattern_score: None,
                ml_score: 50.0,
                ml_confidence: confidence,
                velocity_score: None,
                technical_score: None,
                matched_patterns: Vec::new(),
                degraded_extractors: bundle.degraded.clone(),
            },
            assessed_at,
        }
    }

    /// Audit record for an assessment
    pub fn detection_record(
        &self,
        ctx: &RequestContext,
        assessment: &RiskAssessment,
        feature_snapshot: FeatureBundle,
    ) -> DetectionRecord {
        DetectionRecord {
            id: Uuid::new_v4(),
            session_id: ctx.session_id.clone(),
            user_id: ctx.user_id.clone(),
            bin: ctx.bin.clone(),
            score: assessment.risk_score.score(),
            confidence: assessment.confidence,
            risk_class: assessment.risk_class,
            matched_patterns: assessment.breakdown.matched_patterns.clone(),
            feature_snapshot,
            flagged: assessment.risk_score.score() >= self.config.flag_threshold,
            timestamp: ctx.timestamp,
        }
    }

    /// Mitigation owed for a score, if any
    pub fn action_for(&self, score: u8) -> Option<ActionKind> {
        let c = &self.config;
        if score >= c.block_threshold {
            Some(ActionKind::Block)
        } else if score >= c.strict_rate_limit_threshold {
            Some(ActionKind::RateLimit)
        } else if score >= c.flag_threshold {
            Some(ActionKind::Monitor)
        } else {
            None
        }
    }

    /// Persist the record and apply mitigation. Returns the actions emitted.
    pub async fn enforce(&self, record: DetectionRecord) -> Vec<AutomationAction> {
        let write_timeout = self.audit_config.write_timeout();

        let persisted = self.audit.append_detection(&record);
        if let Err(e) = with_timeout(write_timeout, Error::Persistence, persisted).await {
            self.metrics.record_persistence_failure();
            error!(
                detection_id = %record.id,
                session_id = %record.session_id,
                error = %e,
                "Failed to persist detection record"
            );
        }

        let Some(kind) = self.action_for(record.score) else {
            return Vec::new();
        };

        let succeeded = self.mitigate(kind, &record.session_id).await;
        let action = AutomationAction {
            id: Uuid::new_v4(),
            detection_id: record.id,
            session_id: record.session_id.clone(),
            kind,
            succeeded,
            created_at: record.timestamp,
        };

        let persisted = self.audit.append_action(&action);
        if let Err(e) = with_timeout(write_timeout, Error::Persistence, persisted).await {
            self.metrics.record_persistence_failure();
            error!(
                action_id = %action.id,
                action = kind.as_str(),
                error = %e,
                "Failed to persist automation action"
            );
        }

        vec![action]
    }

    async fn mitigate(&self, kind: ActionKind, session_id: &str) -> bool {
        let timeout = self.audit_config.mitigation_timeout();
        let result = match kind {
            ActionKind::Block => {
                let call = self.sessions.block_session(session_id);
                with_timeout(timeout, Error::Mitigation, call).await
            }
            ActionKind::RateLimit => {
                let call = self.sessions.apply_strict_rate_limits(session_id);
                with_timeout(timeout, Error::Mitigation, call).await
            }
            ActionKind::Monitor => Ok(()),
        };

        let succeeded = result.is_ok();
        self.metrics.record_mitigation(kind.as_str(), succeeded);
        match result {
            Ok(()) => info!(session_id = %session_id, action = kind.as_str(), "Mitigation applied"),
            Err(e) => warn!(
                session_id = %session_id,
                action = kind.as_str(),
                error = %e,
                "Mitigation failed"
            ),
        }
        succeeded
    }
}

impl std::fmt::Debug for DecisionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionController")
            .field("config", &self.config)
            .field("audit_config", &self.audit_config)
            .finish_non_exhaustive()
    }
}

async fn with_timeout<F>(timeout: Duration, on_timeout: fn(String) -> Error, fut: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(format!("timed out after {}ms", timeout.as_millis()))),
    }
}
