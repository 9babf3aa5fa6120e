//! Composite risk scorer
//!
//! Blends the pattern, ensemble, velocity and technical sub-scores into one
//! number, with a confidence that falls as the components disagree.

use crate::config::CompositeConfig;
use crate::ensemble::EnsembleScore;
use crate::features::{names, FeatureBundle};
use crate::patterns::PatternScore;
use crate::types::ComponentBreakdown;
use serde::{Deserialize, Serialize};

/// Composite scorer output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeScore {
    /// 0-100, unrounded
    pub score: f64,
    /// 0-1
    pub confidence: f64,
    /// Human-readable risk factors
    pub risk_factors: Vec<String>,
    /// Component scores
    pub breakdown: ComponentBreakdown,
}

/// Weighted composite over the present components
#[derive(Debug, Clone)]
pub struct CompositeScorer {
    config: CompositeConfig,
}

impl CompositeScorer {
    /// Create scorer
    pub fn new(config: &CompositeConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Combine sub-scores.
    ///
    /// Velocity and technical components are absent when their extractor
    /// degraded; the pattern component is absent when no pattern could be
    /// evaluated. Zero-weight components take no part in score, confidence
    /// or factors.
    pub fn score(
        &self,
        bundle: &FeatureBundle,
        patterns: &PatternScore,
        ml: &EnsembleScore,
    ) -> CompositeScore {
        let velocity_score = (!bundle.is_degraded(names::VELOCITY))
            .then(|| bundle.velocity.risk());
        let technical_score = (!bundle.is_degraded(names::TECHNICAL))
            .then(|| bundle.technical.risk());

        let w = &self.config.weights;
        let components: Vec<(&str, f64, f64)> = [
            ("Pattern", patterns.score, w.patterns),
            ("Model", Some(ml.score), w.ml),
            ("Velocity", velocity_score, w.velocity),
            ("Technical", technical_score, w.technical),
        ]
        .into_iter()
        .filter(|(_, _, weight)| *weight > 0.0)
        .filter_map(|(label, score, weight)| score.map(|s| (label, sanitize(s), weight)))
        .collect();

        let total_weight: f64 = components.iter().map(|(_, _, w)| w).sum();
        let score = if total_weight > 0.0 {
            components.iter().map(|(_, s, w)| s * w).sum::<f64>() / total_weight
        } else {
            ml.score
        };

        let values: Vec<f64> = components.iter().map(|(_, s, _)| *s).collect();
        let confidence = self.confidence(&values, bundle.degraded.len());

        let mut risk_factors: Vec<String> = components
            .iter()
            .filter(|(_, s, _)| *s > self.config.factor_threshold)
            .map(|(label, s, _)| format!("{} risk {:.1}", label, s))
            .collect();

        for m in &patterns.matches {
            if m.match_confidence > self.config.pattern_factor_confidence {
                for evidence in &m.evidence {
                    if !risk_factors.contains(evidence) {
                        risk_factors.push(evidence.clone());
                    }
                }
            }
        }

        CompositeScore {
            score: sanitize(score),
            confidence,
            risk_factors,
            breakdown: ComponentBreakdown {
                pattern_score: patterns.score,
                ml_score: ml.score,
                ml_confidence: ml.confidence,
                velocity_score,
                technical_score,
                matched_patterns: patterns.matches.iter().map(|m| m.pattern_id.clone()).collect(),
                degraded_extractors: bundle.degraded.clone(),
            },
        }
    }

    /// `max(floor, 1 - variance / normalizer)`, reduced per degraded extractor
    fn confidence(&self, values: &[f64], degraded: usize) -> f64 {
        let floor = self.config.confidence_floor;
        let agreement = if values.len() < 2 {
            1.0
        } else {
            1.0 - population_variance(values) / self.config.variance_normalizer
        };

        let penalty = (1.0 - self.config.degraded_penalty * degraded as f64).max(0.0);
        (agreement.max(floor) * penalty).clamp(floor, 1.0)
    }
}

fn population_variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

fn sanitize(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 100.0)
    } else {
        50.0
    }
}
