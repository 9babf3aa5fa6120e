//! Model ensemble
//!
//! Three independent scorers each return a fraud probability with a
//! confidence. Scorers at or below the confidence floor sit out, and the
//! remaining fixed weights are renormalized over the participants.

use crate::config::EnsembleConfig;
use crate::features::{names, FeatureBundle};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Output of one scorer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelOutput {
    /// 0-1
    pub fraud_probability: f64,
    /// 0-1
    pub confidence: f64,
}

/// A pluggable scoring model
pub trait RiskModel: Send + Sync {
    /// Model name, used in logs
    fn name(&self) -> &'static str;

    /// Score a feature bundle
    fn predict(&self, bundle: &FeatureBundle) -> Result<ModelOutput>;
}

/// Broad scorer over every feature family.
///
/// Weighted noisy-or of the four family signals: each signal is an
/// independent chance of fraud, discounted by how much the family is trusted.
#[derive(Debug, Clone, Default)]
pub struct BroadScorer;

impl BroadScorer {
    const VELOCITY_WEIGHT: f64 = 0.9;
    const GEOGRAPHIC_WEIGHT: f64 = 0.8;
    const BEHAVIORAL_WEIGHT: f64 = 0.7;
    const TECHNICAL_WEIGHT: f64 = 0.6;
}

impl RiskModel for BroadScorer {
    fn name(&self) -> &'static str {
        "ensemble"
    }

    fn predict(&self, bundle: &FeatureBundle) -> Result<ModelOutput> {
        let signals = [
            (Self::VELOCITY_WEIGHT, bundle.velocity.risk() / 100.0),
            (Self::GEOGRAPHIC_WEIGHT, bundle.geographic.risk_signal()),
            (Self::BEHAVIORAL_WEIGHT, bundle.behavioral.risk_signal()),
            (Self::TECHNICAL_WEIGHT, bundle.technical.risk() / 100.0),
        ];

        let clean: f64 = signals
            .iter()
            .map(|(w, s)| 1.0 - w * s.clamp(0.0, 1.0))
            .product();

        Ok(ModelOutput {
            fraud_probability: 1.0 - clean,
            confidence: 0.2 + 0.2 * bundle.available_extractors() as f64,
        })
    }
}

/// Velocity-specific scorer
#[derive(Debug, Clone, Default)]
pub struct VelocityModel;

impl RiskModel for VelocityModel {
    fn name(&self) -> &'static str {
        "velocity"
    }

    fn predict(&self, bundle: &FeatureBundle) -> Result<ModelOutput> {
        let v = &bundle.velocity;
        let lookups = (v.lookups_per_minute as f64 / 100.0).min(1.0);
        let requests = (v.requests_per_second as f64 / 5.0).min(1.0);

        let confidence = if bundle.is_degraded(names::VELOCITY) {
            0.1
        } else if v.lookups_per_minute == 0 && v.requests_per_second == 0 {
            // No evidence either way
            0.3
        } else {
            0.8
        };

        // Either rate saturating is enough
        Ok(ModelOutput {
            fraud_probability: 1.0 - (1.0 - lookups) * (1.0 - requests),
            confidence,
        })
    }
}

/// Behavioral-specific scorer
#[derive(Debug, Clone, Default)]
pub struct BehavioralModel;

impl RiskModel for BehavioralModel {
    fn name(&self) -> &'static str {
        "behavioral"
    }

    fn predict(&self, bundle: &FeatureBundle) -> Result<ModelOutput> {
        let b = &bundle.behavioral;
        let missing_ua = if b.has_user_agent { 0.0 } else { 1.0 };
        let probability =
            0.35 * missing_ua + 0.5 * b.timing_consistency + 0.15 * b.extra_pattern_count() as f64;

        let confidence = if bundle.is_degraded(names::BEHAVIORAL) {
            0.1
        } else if b.request_count < 3 {
            0.3
        } else {
            0.5 + (b.request_count as f64 / 25.0).min(0.4)
        };

        Ok(ModelOutput {
            fraud_probability: probability.clamp(0.0, 1.0),
            confidence,
        })
    }
}

/// Combined ensemble result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleScore {
    /// 0-100
    pub score: f64,
    /// 0-1
    pub confidence: f64,
    /// Scorers that participated
    pub participants: Vec<String>,
}

/// Confidence-gated weighted ensemble
pub struct ModelEnsemble {
    models: Vec<(Box<dyn RiskModel>, f64)>,
    config: EnsembleConfig,
}

impl ModelEnsemble {
    /// Standard three-scorer ensemble
    pub fn new(config: &EnsembleConfig) -> Self {
        let w = &config.weights;
        Self::with_models(
            vec![
                (Box::new(BroadScorer) as Box<dyn RiskModel>, w.ensemble),
                (Box::new(VelocityModel) as Box<dyn RiskModel>, w.velocity),
                (Box::new(BehavioralModel) as Box<dyn RiskModel>, w.behavioral),
            ],
            config,
        )
    }

    /// Ensemble over arbitrary weighted models
    pub fn with_models(models: Vec<(Box<dyn RiskModel>, f64)>, config: &EnsembleConfig) -> Self {
        Self {
            models,
            config: config.clone(),
        }
    }

    /// Score a bundle. Never fails: failing or unsure scorers are excluded.
    pub fn score(&self, bundle: &FeatureBundle) -> EnsembleScore {
        let mut weighted_probability = 0.0;
        let mut weighted_confidence = 0.0;
        let mut total_weight = 0.0;
        let mut participants = Vec::new();

        for (model, weight) in &self.models {
            let output = match model.predict(bundle).and_then(|o| validate(model.name(), o)) {
                Ok(output) => output,
                Err(e) => {
                    warn!(model = model.name(), error = %e, "Model excluded from ensemble");
                    continue;
                }
            };

            if output.confidence <= self.config.min_confidence || *weight <= 0.0 {
                debug!(
                    model = model.name(),
                    confidence = output.confidence,
                    "Model below confidence floor"
                );
                continue;
            }

            weighted_probability += weight * output.fraud_probability;
            weighted_confidence += weight * output.confidence;
            total_weight += weight;
            participants.push(model.name().to_string());
        }

        if total_weight <= 0.0 {
            return EnsembleScore {
                score: self.config.fallback_score,
                confidence: self.config.fallback_confidence,
                participants,
            };
        }

        EnsembleScore {
            score: (weighted_probability / total_weight * 100.0).clamp(0.0, 100.0),
            confidence: (weighted_confidence / total_weight).clamp(0.0, 1.0),
            participants,
        }
    }
}

impl std::fmt::Debug for ModelEnsemble {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.models.iter().map(|(m, w)| (m.name(), *w)).collect();
        f.debug_struct("ModelEnsemble").field("models", &names).finish()
    }
}

fn validate(model: &'static str, output: ModelOutput) -> Result<ModelOutput> {
    let in_range = |x: f64| x.is_finite() && (0.0..=1.0).contains(&x);
    if !in_range(output.fraud_probability) || !in_range(output.confidence) {
        return Err(Error::Model {
            model,
            reason: format!(
                "output out of range: probability={} confidence={}",
                output.fraud_probability, output.confidence
            ),
        });
    }
    Ok(output)
}
