//! Pattern evaluation
//!
//! Each rule type has a deterministic, side-effect-free evaluator returning
//! a match confidence in [0, 1] with human-readable evidence. A pattern whose
//! parameters cannot be evaluated is excluded and logged.

use super::{FraudPattern, PatternRule, PatternSet, PatternType};
use crate::features::FeatureBundle;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Outcome of evaluating one pattern
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    /// Pattern id
    pub pattern_id: String,
    /// Pattern name
    pub pattern_name: String,
    /// Pattern type
    pub pattern_type: PatternType,
    /// Risk weight of the pattern
    pub risk_weight: f64,
    /// Confidence > 0
    pub is_match: bool,
    /// 0-1
    pub match_confidence: f64,
    /// Why it matched
    pub evidence: Vec<String>,
}

impl PatternMatch {
    /// Risk contributed by this match
    pub fn contribution(&self) -> f64 {
        self.risk_weight * self.match_confidence
    }
}

/// Aggregate of one pattern-matching pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternScore {
    /// Mean contribution of matched patterns (0-100); `None` when no pattern
    /// could be evaluated at all
    pub score: Option<f64>,
    /// Matched patterns, in pattern-id order
    pub matches: Vec<PatternMatch>,
    /// Patterns evaluated successfully
    pub evaluated: usize,
    /// Patterns excluded because evaluation failed
    pub failed: usize,
}

/// Evaluates a pattern set against a feature bundle
#[derive(Debug, Clone, Default)]
pub struct PatternMatcher;

impl PatternMatcher {
    /// Create matcher
    pub fn new() -> Self {
        Self
    }

    /// Evaluate every pattern; failed patterns are excluded
    pub fn evaluate_all(&self, patterns: &PatternSet, bundle: &FeatureBundle) -> PatternScore {
        let mut result = PatternScore::default();

        for pattern in patterns.values() {
            match self.evaluate(pattern, bundle) {
                Ok(m) => {
                    result.evaluated += 1;
                    if m.is_match {
                        result.matches.push(m);
                    }
                }
                Err(e) => {
                    result.failed += 1;
                    warn!(pattern_id = %pattern.id, error = %e, "Pattern excluded from matching");
                }
            }
        }

        if result.evaluated > 0 {
            result.score = Some(aggregate(&result.matches));
        }
        result
    }

    /// Evaluate one pattern
    pub fn evaluate(&self, pattern: &FraudPattern, bundle: &FeatureBundle) -> Result<PatternMatch> {
        if !pattern.risk_weight.is_finite() || !(0.0..=100.0).contains(&pattern.risk_weight) {
            return Err(invalid(pattern, format!("risk_weight {} outside [0, 100]", pattern.risk_weight)));
        }

        let (confidence, evidence) = match &pattern.rule {
            PatternRule::Velocity {
                max_lookups_per_minute,
                max_requests_per_second,
            } => evaluate_velocity(pattern, bundle, *max_lookups_per_minute, *max_requests_per_second)?,
            PatternRule::Geographic {
                max_distinct_countries,
                flag_high_risk_country,
            } => evaluate_geographic(pattern, bundle, *max_distinct_countries, *flag_high_risk_country)?,
            PatternRule::Behavioral {
                min_timing_consistency,
                flag_missing_user_agent,
                flag_bot_user_agent,
            } => evaluate_behavioral(
                pattern,
                bundle,
                *min_timing_consistency,
                *flag_missing_user_agent,
                *flag_bot_user_agent,
            )?,
            PatternRule::Technical {
                flag_test_bin,
                flag_invalid_luhn,
                flag_suspicious_range,
            } => evaluate_technical(bundle, *flag_test_bin, *flag_invalid_luhn, *flag_suspicious_range),
        };

        let match_confidence = confidence.clamp(0.0, 1.0);
        Ok(PatternMatch {
            pattern_id: pattern.id.clone(),
            pattern_name: pattern.name.clone(),
            pattern_type: pattern.pattern_type(),
            risk_weight: pattern.risk_weight,
            is_match: match_confidence > 0.0,
            match_confidence,
            evidence,
        })
    }
}

/// Mean of `risk_weight × match_confidence` over matches, clamped to [0, 100]
pub fn aggregate(matches: &[PatternMatch]) -> f64 {
    if matches.is_empty() {
        return 0.0;
    }
    let total: f64 = matches.iter().map(PatternMatch::contribution).sum();
    (total / matches.len() as f64).clamp(0.0, 100.0)
}

fn invalid(pattern: &FraudPattern, reason: String) -> Error {
    Error::PatternEvaluation {
        pattern_id: pattern.id.clone(),
        reason,
    }
}

/// 0.5 at the first unit over `limit`, rising to 1.0 at twice the limit
fn excess_confidence(observed: u64, limit: u64) -> f64 {
    if observed <= limit {
        return 0.0;
    }
    let excess = (observed - limit) as f64 / limit as f64;
    0.5 + 0.5 * excess.min(1.0)
}

fn evaluate_velocity(
    pattern: &FraudPattern,
    bundle: &FeatureBundle,
    max_lookups: u64,
    max_requests: u64,
) -> Result<(f64, Vec<String>)> {
    if max_lookups == 0 || max_requests == 0 {
        return Err(invalid(pattern, "velocity ceilings must be positive".to_string()));
    }

    let v = &bundle.velocity;
    let mut evidence = Vec::new();

    let lookups = excess_confidence(v.lookups_per_minute, max_lookups);
    if lookups > 0.0 {
        evidence.push(format!(
            "Lookup rate {}/min exceeds {}/min",
            v.lookups_per_minute, max_lookups
        ));
    }

    let requests = excess_confidence(v.requests_per_second, max_requests);
    if requests > 0.0 {
        evidence.push(format!(
            "Request rate {}/s exceeds {}/s",
            v.requests_per_second, max_requests
        ));
    }

    Ok((lookups.max(requests), evidence))
}

fn evaluate_geographic(
    pattern: &FraudPattern,
    bundle: &FeatureBundle,
    max_countries: u32,
    flag_high_risk: bool,
) -> Result<(f64, Vec<String>)> {
    if max_countries == 0 {
        return Err(invalid(pattern, "max_distinct_countries must be positive".to_string()));
    }

    let g = &bundle.geographic;
    let mut confidence: f64 = 0.0;
    let mut evidence = Vec::new();

    if g.impossible_travel {
        let extra = g.country_changes.saturating_sub(4) as f64;
        confidence = confidence.max((0.6 + 0.05 * extra).min(0.95));
        evidence.push(format!(
            "Impossible travel: {} countries in the trailing window",
            g.country_changes
        ));
    }

    if g.country_changes > max_countries {
        let extra = (g.country_changes - max_countries) as f64;
        confidence = confidence.max((0.4 + 0.1 * extra).min(0.9));
        evidence.push(format!(
            "Lookups from {} countries (limit {})",
            g.country_changes, max_countries
        ));
    }

    if flag_high_risk && g.is_high_risk_country {
        confidence = confidence.max(0.5);
        evidence.push(format!("High-risk country: {}", g.current_country));
    }

    Ok((confidence, evidence))
}

fn evaluate_behavioral(
    pattern: &FraudPattern,
    bundle: &FeatureBundle,
    min_timing: f64,
    flag_missing_ua: bool,
    flag_bot_ua: bool,
) -> Result<(f64, Vec<String>)> {
    if !(min_timing > 0.0 && min_timing <= 1.0) {
        return Err(invalid(
            pattern,
            format!("min_timing_consistency {} outside (0, 1]", min_timing),
        ));
    }

    let b = &bundle.behavioral;
    let mut confidence: f64 = 0.0;
    let mut evidence = Vec::new();

    if b.timing_consistency >= min_timing {
        confidence = confidence.max(b.timing_consistency);
        evidence.push(format!(
            "Uniform request timing (consistency {:.2})",
            b.timing_consistency
        ));
    }

    if flag_missing_ua && !b.has_user_agent {
        confidence = confidence.max(0.9);
        evidence.push("Missing user agent".to_string());
    }

    if flag_bot_ua {
        for signature in b.bot_signatures() {
            confidence = confidence.max(0.85);
            evidence.push(format!("Bot user agent signature: {}", signature));
        }
    }

    Ok((confidence, evidence))
}

fn evaluate_technical(
    bundle: &FeatureBundle,
    flag_test_bin: bool,
    flag_invalid_luhn: bool,
    flag_suspicious_range: bool,
) -> (f64, Vec<String>) {
    let t = &bundle.technical;
    let mut signals = Vec::new();

    if flag_invalid_luhn && !t.is_luhn_valid {
        signals.push((0.8, "Invalid Luhn checksum".to_string()));
    }
    if flag_suspicious_range && t.is_suspicious_range {
        signals.push((0.75, format!("Suspicious BIN range: {}", t.bin_number)));
    }
    if flag_test_bin && t.is_test_bin {
        signals.push((0.5, format!("Known test BIN: {}", t.bin_number)));
    }

    if signals.is_empty() {
        return (0.0, Vec::new());
    }

    let strongest = signals.iter().map(|(c, _)| *c).fold(0.0, f64::max);
    let confidence = (strongest + 0.1 * (signals.len() - 1) as f64).min(1.0);
    (confidence, signals.into_iter().map(|(_, e)| e).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{BehavioralFeatures, GeographicFeatures, TechnicalFeatures, VelocityFeatures};

    fn bundle() -> FeatureBundle {
        FeatureBundle {
            velocity: VelocityFeatures::default(),
            geographic: GeographicFeatures {
                country_changes: 1,
                current_country: "US".to_string(),
                is_high_risk_country: false,
                impossible_travel: false,
                countries: vec!["US".to_string()],
            },
            behavioral: BehavioralFeatures {
                has_user_agent: true,
                ..Default::default()
            },
            technical: TechnicalFeatures {
                bin_number: "457176".to_string(),
                is_test_bin: false,
                is_luhn_valid: true,
                is_suspicious_range: false,
            },
            degraded: Vec::new(),
        }
    }

    fn velocity_pattern(weight: f64) -> FraudPattern {
        FraudPattern::new(
            "burst",
            "Lookup burst",
            PatternRule::Velocity {
                max_lookups_per_minute: 50,
                max_requests_per_second: 5,
            },
            weight,
        )
    }

    fn set(patterns: Vec<FraudPattern>) -> PatternSet {
        patterns.into_iter().map(|p| (p.id.clone(), p)).collect()
    }

    #[test]
    fn test_single_full_confidence_match_scores_its_weight() {
        let mut b = bundle();
        b.velocity.lookups_per_minute = 100;

        let score = PatternMatcher::new().evaluate_all(&set(vec![velocity_pattern(80.0)]), &b);

        assert_eq!(score.matches.len(), 1);
        assert_eq!(score.matches[0].match_confidence, 1.0);
        assert_eq!(score.score, Some(80.0));
    }

    #[test]
    fn test_zero_confidence_contributes_nothing() {
        let score = PatternMatcher::new().evaluate_all(&set(vec![velocity_pattern(80.0)]), &bundle());

        assert!(score.matches.is_empty());
        assert_eq!(score.evaluated, 1);
        assert_eq!(score.score, Some(0.0));
    }

    #[test]
    fn test_unmatched_patterns_do_not_dilute() {
        let mut b = bundle();
        b.velocity.lookups_per_minute = 100;
        let patterns = set(vec![
            velocity_pattern(80.0),
            FraudPattern::new(
                "hopping",
                "Country hopping",
                PatternRule::Geographic {
                    max_distinct_countries: 2,
                    flag_high_risk_country: true,
                },
                75.0,
            ),
        ]);

        let score = PatternMatcher::new().evaluate_all(&patterns, &b);
        assert_eq!(score.evaluated, 2);
        assert_eq!(score.score, Some(80.0));
    }

    #[test]
    fn test_invalid_pattern_is_excluded() {
        let mut b = bundle();
        b.velocity.lookups_per_minute = 100;
        let broken = FraudPattern::new(
            "broken",
            "Broken",
            PatternRule::Velocity {
                max_lookups_per_minute: 0,
                max_requests_per_second: 5,
            },
            90.0,
        );

        let score = PatternMatcher::new().evaluate_all(&set(vec![broken, velocity_pattern(60.0)]), &b);
        assert_eq!(score.failed, 1);
        assert_eq!(score.evaluated, 1);
        assert_eq!(score.score, Some(60.0));

        let only_broken = FraudPattern::new(
            "bad-weight",
            "Bad weight",
            PatternRule::Technical {
                flag_test_bin: true,
                flag_invalid_luhn: true,
                flag_suspicious_range: true,
            },
            250.0,
        );
        let score = PatternMatcher::new().evaluate_all(&set(vec![only_broken]), &b);
        assert_eq!(score.score, None);
    }

    #[test]
    fn test_impossible_travel_matches_any_geographic_pattern() {
        let mut b = bundle();
        b.geographic.country_changes = 5;
        b.geographic.impossible_travel = true;
        let lenient = FraudPattern::new(
            "lenient-geo",
            "Lenient geo",
            PatternRule::Geographic {
                max_distinct_countries: 10,
                flag_high_risk_country: false,
            },
            60.0,
        );

        let m = PatternMatcher::new().evaluate(&lenient, &b).unwrap();
        assert!(m.is_match);
        assert!(m.match_confidence >= 0.6);
    }

    #[test]
    fn test_technical_evidence() {
        let mut b = bundle();
        b.technical.is_luhn_valid = false;
        b.technical.is_suspicious_range = true;
        let pattern = &FraudPattern::default_set()[3];

        let m = PatternMatcher::new().evaluate(pattern, &b).unwrap();
        assert!((m.match_confidence - 0.9).abs() < 1e-9);
        assert_eq!(m.evidence[0], "Invalid Luhn checksum");
    }

    #[test]
    fn test_behavioral_evidence() {
        let mut b = bundle();
        b.behavioral.has_user_agent = false;
        b.behavioral.suspicious_patterns = vec!["missing_user_agent".to_string()];
        let pattern = &FraudPattern::default_set()[2];

        let m = PatternMatcher::new().evaluate(pattern, &b).unwrap();
        assert_eq!(m.match_confidence, 0.9);
        assert_eq!(m.evidence, vec!["Missing user agent"]);
    }
}
