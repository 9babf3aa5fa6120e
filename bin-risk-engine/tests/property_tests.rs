//! Property-based tests for scoring invariants
//!
//! - Bounds: risk score within [0, 100], confidence within [0, 1]
//! - Blocking: `is_blocked` exactly when the rounded score reaches 95
//! - Determinism: the same bundle and patterns give the same assessment
//! - Pattern score: never outside [0, 100], zero-confidence matches add nothing

use bin_risk_engine::config::{AuditConfig, CompositeConfig, DecisionConfig, SignalConfig};
use bin_risk_engine::ensemble::EnsembleScore;
use bin_risk_engine::features::behavioral::timing_consistency;
use bin_risk_engine::features::{
    BehavioralFeatures, FeatureBundle, GeographicFeatures, TechnicalExtractor, TechnicalFeatures,
    VelocityFeatures,
};
use bin_risk_engine::patterns::{PatternScore, PatternSet};
use bin_risk_engine::store::{
    MemoryAuditStore, MemoryEventStore, MemoryPatternRepository, MemorySessionController,
};
use bin_risk_engine::types::{ComponentBreakdown, RequestContext};
use bin_risk_engine::{
    CompositeScore, CompositeScorer, DecisionController, EngineConfig, FraudPattern, Metrics,
    PatternMatcher, RiskEngine,
};
use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use std::sync::Arc;

/// Strategy for generating velocity features
fn velocity_strategy() -> impl Strategy<Value = VelocityFeatures> {
    (0u64..500, 0u64..50, 0i64..7200).prop_map(|(lpm, rps, age)| VelocityFeatures {
        lookups_per_minute: lpm,
        requests_per_second: rps,
        session_age_secs: age,
    })
}

/// Strategy for generating geographic features
fn geographic_strategy() -> impl Strategy<Value = GeographicFeatures> {
    (0u32..12, any::<bool>(), "[A-Z]{2}").prop_map(|(distinct, high_risk, country)| {
        GeographicFeatures {
            country_changes: distinct,
            current_country: country,
            is_high_risk_country: high_risk,
            impossible_travel: distinct > 3,
            countries: Vec::new(),
        }
    })
}

/// Strategy for generating behavioral features
fn behavioral_strategy() -> impl Strategy<Value = BehavioralFeatures> {
    let tags = prop::sample::subsequence(
        vec![
            "bot_user_agent:curl",
            "minimal_user_agent",
            "outdated_browser",
            "uniform_request_timing",
        ],
        0..4,
    );
    (any::<bool>(), 0.0f64..=1.0, tags, 0u64..200).prop_map(|(has_ua, timing, tags, count)| {
        let mut suspicious_patterns: Vec<String> = tags.into_iter().map(String::from).collect();
        if !has_ua {
            suspicious_patterns.insert(0, "missing_user_agent".to_string());
        }
        BehavioralFeatures {
            has_user_agent: has_ua,
            timing_consistency: timing,
            suspicious_patterns,
            request_count: count,
        }
    })
}

/// Strategy for generating technical features
fn technical_strategy() -> impl Strategy<Value = TechnicalFeatures> {
    ("[0-9]{6}", any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
        |(bin, test, luhn, range)| TechnicalFeatures {
            bin_number: bin,
            is_test_bin: test,
            is_luhn_valid: luhn,
            is_suspicious_range: range,
        },
    )
}

/// Strategy for generating degraded extractor lists
fn degraded_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::sample::subsequence(vec!["velocity", "geographic", "behavioral", "technical"], 0..=4)
        .prop_map(|names| names.into_iter().map(String::from).collect())
}

/// Strategy for generating full feature bundles
fn bundle_strategy() -> impl Strategy<Value = FeatureBundle> {
    (
        velocity_strategy(),
        geographic_strategy(),
        behavioral_strategy(),
        technical_strategy(),
        degraded_strategy(),
    )
        .prop_map(|(velocity, geographic, behavioral, technical, degraded)| FeatureBundle {
            velocity,
            geographic,
            behavioral,
            technical,
            degraded,
        })
}

fn context() -> RequestContext {
    RequestContext {
        session_id: "sess-prop".to_string(),
        user_id: None,
        bin: "411111".to_string(),
        ip: "192.0.2.10".to_string(),
        user_agent: None,
        country: "US".to_string(),
        timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
    }
}

fn create_test_engine() -> RiskEngine {
    RiskEngine::new(
        EngineConfig::default(),
        Arc::new(MemoryEventStore::new()),
        Arc::new(MemoryPatternRepository::with_defaults()),
        Arc::new(MemorySessionController::new()),
        Arc::new(MemoryAuditStore::new()),
    )
    .unwrap()
}

fn default_patterns() -> PatternSet {
    FraudPattern::default_set()
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect()
}

fn create_test_controller() -> DecisionController {
    DecisionController::new(
        &DecisionConfig::default(),
        &AuditConfig::default(),
        Arc::new(MemorySessionController::new()),
        Arc::new(MemoryAuditStore::new()),
        Metrics::new().unwrap(),
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: every assessment is within bounds and blocks exactly at 95
    #[test]
    fn prop_assessment_bounds(bundle in bundle_strategy()) {
        let engine = create_test_engine();
        let assessment = engine.assess(&context(), &bundle, &default_patterns());

        prop_assert!(assessment.risk_score.score() <= 100);
        prop_assert!((0.0..=1.0).contains(&assessment.confidence));
        prop_assert!((0.0..=100.0).contains(&assessment.composite_score));
        prop_assert_eq!(assessment.is_blocked, assessment.risk_score.score() >= 95);
    }

    /// Property: scoring is a pure function of bundle and patterns
    #[test]
    fn prop_deterministic_assessment(bundle in bundle_strategy()) {
        let engine = create_test_engine();
        let other = create_test_engine();
        let patterns = default_patterns();

        let first = engine.assess(&context(), &bundle, &patterns);
        let second = engine.assess(&context(), &bundle, &patterns);
        let third = other.assess(&context(), &bundle, &patterns);

        prop_assert_eq!(&first, &second);
        prop_assert_eq!(&first, &third);
    }

    /// Property: the block decision follows the rounded composite
    #[test]
    fn prop_block_threshold(score in -50.0f64..150.0, confidence in 0.0f64..=1.0) {
        let controller = create_test_controller();
        let assessment = controller.decide(
            CompositeScore {
                score,
                confidence,
                risk_factors: Vec::new(),
                breakdown: ComponentBreakdown {
                    pattern_score: None,
                    ml_score: score,
                    ml_confidence: confidence,
                    velocity_score: None,
                    technical_score: None,
                    matched_patterns: Vec::new(),
                    degraded_extractors: Vec::new(),
                },
            },
            Utc::now(),
        );

        let rounded = score.round().clamp(0.0, 100.0) as u8;
        prop_assert_eq!(assessment.risk_score.score(), rounded);
        prop_assert_eq!(assessment.is_blocked, rounded >= 95);
    }

    /// Property: composite confidence never drops below its floor
    #[test]
    fn prop_composite_confidence_floor(
        bundle in bundle_strategy(),
        pattern in prop::option::of(0.0f64..=100.0),
        ml in 0.0f64..=100.0,
    ) {
        let scorer = CompositeScorer::new(&CompositeConfig::default());
        let patterns = PatternScore {
            score: pattern,
            matches: Vec::new(),
            evaluated: if pattern.is_some() { 1 } else { 0 },
            failed: 0,
        };
        let result = scorer.score(
            &bundle,
            &patterns,
            &EnsembleScore { score: ml, confidence: 0.5, participants: Vec::new() },
        );

        prop_assert!(result.confidence >= 0.1);
        prop_assert!(result.confidence <= 1.0);
        prop_assert!((0.0..=100.0).contains(&result.score));
    }

    /// Property: pattern score stays in range and ignores non-matches
    #[test]
    fn prop_pattern_score_bounds(bundle in bundle_strategy()) {
        let result = PatternMatcher::new().evaluate_all(&default_patterns(), &bundle);

        let score = result.score.unwrap_or(0.0);
        prop_assert!((0.0..=100.0).contains(&score));
        prop_assert!(result.matches.iter().all(|m| m.is_match && m.match_confidence > 0.0));
        prop_assert!(result.matches.iter().all(|m| (0.0..=1.0).contains(&m.match_confidence)));
        if result.matches.is_empty() {
            prop_assert_eq!(score, 0.0);
        }
    }

    /// Property: timing consistency is always a valid fraction
    #[test]
    fn prop_timing_consistency_bounds(gaps in prop::collection::vec(0i64..60_000, 0..20)) {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut timestamps = vec![start];
        for gap in &gaps {
            let last = *timestamps.last().unwrap();
            timestamps.push(last + Duration::milliseconds(*gap));
        }

        let consistency = timing_consistency(&timestamps, 3);
        prop_assert!((0.0..=1.0).contains(&consistency));
        if timestamps.len() < 3 {
            prop_assert_eq!(consistency, 0.0);
        }
    }

    /// Property: canonical BINs are always six digits
    #[test]
    fn prop_canonical_bin_is_six_digits(raw in "[0-9 -]{0,24}") {
        let extractor = TechnicalExtractor::new(&SignalConfig::default());
        let bin = extractor.canonicalize(&raw);

        prop_assert_eq!(bin.len(), 6);
        prop_assert!(bin.chars().all(|c| c.is_ascii_digit()));
    }
}
