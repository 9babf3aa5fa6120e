//! Configuration for the risk engine

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Risk engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Service name, used in logs
    pub service_name: String,

    /// Feature extraction windows and budgets
    pub extraction: ExtractionConfig,

    /// Pattern cache configuration
    pub patterns: PatternConfig,

    /// Model ensemble configuration
    pub ensemble: EnsembleConfig,

    /// Composite scorer configuration
    pub composite: CompositeConfig,

    /// Decision thresholds
    pub decision: DecisionConfig,

    /// Static signal tables
    pub signals: SignalConfig,

    /// Audit and mitigation side effects
    pub audit: AuditConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            service_name: "bin-risk-engine".to_string(),
            extraction: ExtractionConfig::default(),
            patterns: PatternConfig::default(),
            ensemble: EnsembleConfig::default(),
            composite: CompositeConfig::default(),
            decision: DecisionConfig::default(),
            signals: SignalConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

/// Feature extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Per-extractor time budget
    pub timeout_ms: u64,

    /// Trailing window for lookups-per-minute
    pub velocity_window_secs: i64,

    /// Trailing window for requests-per-second
    pub burst_window_secs: i64,

    /// Trailing window for distinct countries
    pub geo_window_secs: i64,

    /// More distinct countries than this in the geo window is "impossible travel"
    pub impossible_travel_countries: usize,

    /// Trailing window for behavioral request counts
    pub behavior_window_secs: i64,

    /// Events considered for timing consistency
    pub timing_sample_size: usize,

    /// Below this many events timing consistency is 0
    pub min_timing_samples: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 250,
            velocity_window_secs: 60,
            burst_window_secs: 1,
            geo_window_secs: 3600,
            impossible_travel_countries: 3,
            behavior_window_secs: 3600,
            timing_sample_size: 10,
            min_timing_samples: 3,
        }
    }
}

impl ExtractionConfig {
    /// Per-extractor timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Longest trailing window any extractor queries. Events older than
    /// this can no longer affect a score.
    pub fn retention(&self) -> chrono::Duration {
        let secs = [
            self.velocity_window_secs,
            self.burst_window_secs,
            self.geo_window_secs,
            self.behavior_window_secs,
        ]
        .into_iter()
        .max()
        .unwrap_or_default();
        chrono::Duration::seconds(secs)
    }
}

/// Pattern cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternConfig {
    /// Cache TTL in seconds (default: 5 minutes)
    pub cache_ttl_secs: u64,

    /// Budget for one repository load; a slower load counts as failed
    pub load_timeout_ms: u64,

    /// Optional TOML pattern file used by the `risk-eval` binary
    pub pattern_file: Option<PathBuf>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            load_timeout_ms: 1000,
            pattern_file: None,
        }
    }
}

impl PatternConfig {
    /// Cache TTL
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Repository load timeout
    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

/// Fixed weights of the ensemble scorers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelWeights {
    /// Broad scorer over the whole bundle
    pub ensemble: f64,
    /// Velocity-specific scorer
    pub velocity: f64,
    /// Behavioral-specific scorer
    pub behavioral: f64,
}

impl Default for ModelWeights {
    fn default() -> Self {
        Self {
            ensemble: 0.6,
            velocity: 0.25,
            behavioral: 0.15,
        }
    }
}

/// Model ensemble configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Scorer weights
    pub weights: ModelWeights,

    /// Scorers must be strictly more confident than this to participate
    pub min_confidence: f64,

    /// Score used when no scorer qualifies
    pub fallback_score: f64,

    /// Confidence used when no scorer qualifies
    pub fallback_confidence: f64,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            weights: ModelWeights::default(),
            min_confidence: 0.3,
            fallback_score: 50.0,
            fallback_confidence: 0.1,
        }
    }
}

/// Fixed weights of the composite components
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentWeights {
    /// Pattern matcher
    pub patterns: f64,
    /// Model ensemble
    pub ml: f64,
    /// Direct velocity risk
    pub velocity: f64,
    /// Direct technical risk
    pub technical: f64,
}

impl Default for ComponentWeights {
    fn default() -> Self {
        Self {
            patterns: 0.4,
            ml: 0.4,
            velocity: 0.1,
            technical: 0.1,
        }
    }
}

/// Composite scorer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeConfig {
    /// Component weights
    pub weights: ComponentWeights,

    /// Divisor turning component-score variance into a 0-1 disagreement.
    /// Uncalibrated; tune per deployment.
    pub variance_normalizer: f64,

    /// Lowest confidence ever reported
    pub confidence_floor: f64,

    /// Components scoring above this are listed as risk factors
    pub factor_threshold: f64,

    /// Matched patterns above this confidence are listed as risk factors
    pub pattern_factor_confidence: f64,

    /// Confidence lost per extractor that fell back to its default bundle
    pub degraded_penalty: f64,
}

impl Default for CompositeConfig {
    fn default() -> Self {
        Self {
            weights: ComponentWeights::default(),
            variance_normalizer: 1000.0,
            confidence_floor: 0.1,
            factor_threshold: 70.0,
            pattern_factor_confidence: 0.7,
            degraded_penalty: 0.15,
        }
    }
}

/// Decision thresholds on the rounded risk score
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    /// At or above: blocked
    pub block_threshold: u8,
    /// At or above: flagged
    pub flag_threshold: u8,
    /// At or above: caution
    pub caution_threshold: u8,
    /// At or above: normal; below is low risk
    pub normal_threshold: u8,
    /// Flagged scores at or above this get strict rate limits
    pub strict_rate_limit_threshold: u8,
    /// Below this confidence a caveat is appended
    pub low_confidence_threshold: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            block_threshold: 95,
            flag_threshold: 80,
            caution_threshold: 60,
            normal_threshold: 40,
            strict_rate_limit_threshold: 85,
            low_confidence_threshold: 0.5,
        }
    }
}

/// Known test BIN with its published reference PAN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestBin {
    /// Six-digit BIN
    pub bin: String,
    /// Published test PAN under this BIN
    pub reference_pan: String,
}

impl TestBin {
    fn new(bin: &str, reference_pan: &str) -> Self {
        Self {
            bin: bin.to_string(),
            reference_pan: reference_pan.to_string(),
        }
    }
}

/// Inclusive numeric range of six-digit BINs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinRange {
    /// First BIN in range
    pub start: u32,
    /// Last BIN in range
    pub end: u32,
}

impl BinRange {
    /// Check membership
    pub fn contains(&self, bin: u32) -> bool {
        (self.start..=self.end).contains(&bin)
    }
}

/// Static signal tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// High-risk countries for card fraud
    pub high_risk_countries: Vec<String>,

    /// Commonly abused test BINs
    pub test_bins: Vec<TestBin>,

    /// BIN ranges with no legitimate issuer traffic
    pub suspicious_ranges: Vec<BinRange>,

    /// Lower-case user-agent substrings of automation tools
    pub bot_signatures: Vec<String>,

    /// User agents shorter than this are flagged as minimal
    pub minimal_user_agent_len: usize,

    /// Lower-case user-agent substrings of outdated browsers
    pub outdated_browsers: Vec<String>,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            high_risk_countries: ["CN", "RU", "PK", "NG", "GH", "RO", "KP", "IR"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            test_bins: vec![
                TestBin::new("411111", "4111111111111111"),
                TestBin::new("424242", "4242424242424242"),
                TestBin::new("555555", "5555555555554444"),
                TestBin::new("444444", "4444444444444448"),
                TestBin::new("400000", "4000000000000002"),
                TestBin::new("371449", "371449635398431"),
                TestBin::new("378282", "378282246310005"),
                TestBin::new("378734", "378734493671000"),
                TestBin::new("341111", "341111111111111"),
                TestBin::new("401288", "4012888888881881"),
                TestBin::new("510510", "5105105105105100"),
            ],
            suspicious_ranges: vec![
                // Major industry identifier 0 is unassigned
                BinRange { start: 0, end: 99_999 },
                // National/private assignment, never a card network
                BinRange { start: 900_000, end: 999_999 },
            ],
            bot_signatures: [
                "bot",
                "crawler",
                "spider",
                "scraper",
                "automated",
                "python-requests",
                "curl",
                "wget",
                "postman",
                "headless",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            minimal_user_agent_len: 20,
            outdated_browsers: ["msie 6", "msie 7", "msie 8"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Audit and mitigation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Budget for a single audit write
    pub write_timeout_ms: u64,

    /// Budget for a single mitigation call
    pub mitigation_timeout_ms: u64,

    /// Persist on a spawned task instead of before returning
    pub background: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            write_timeout_ms: 500,
            mitigation_timeout_ms: 500,
            background: false,
        }
    }
}

impl AuditConfig {
    /// Audit write timeout
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// Mitigation call timeout
    pub fn mitigation_timeout(&self) -> Duration {
        Duration::from_millis(self.mitigation_timeout_ms)
    }
}

impl EngineConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = EngineConfig::default();

        if let Ok(timeout) = std::env::var("RISK_ENGINE_EXTRACTOR_TIMEOUT_MS") {
            config.extraction.timeout_ms = parse_env("RISK_ENGINE_EXTRACTOR_TIMEOUT_MS", &timeout)?;
        }

        if let Ok(ttl) = std::env::var("RISK_ENGINE_PATTERN_TTL_SECS") {
            config.patterns.cache_ttl_secs = parse_env("RISK_ENGINE_PATTERN_TTL_SECS", &ttl)?;
        }

        if let Ok(timeout) = std::env::var("RISK_ENGINE_PATTERN_LOAD_TIMEOUT_MS") {
            config.patterns.load_timeout_ms =
                parse_env("RISK_ENGINE_PATTERN_LOAD_TIMEOUT_MS", &timeout)?;
        }

        if let Ok(path) = std::env::var("RISK_ENGINE_PATTERN_FILE") {
            config.patterns.pattern_file = Some(PathBuf::from(path));
        }

        if let Ok(normalizer) = std::env::var("RISK_ENGINE_VARIANCE_NORMALIZER") {
            config.composite.variance_normalizer =
                parse_env("RISK_ENGINE_VARIANCE_NORMALIZER", &normalizer)?;
        }

        if let Ok(background) = std::env::var("RISK_ENGINE_AUDIT_BACKGROUND") {
            config.audit.background = parse_env("RISK_ENGINE_AUDIT_BACKGROUND", &background)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the scorers cannot work with
    pub fn validate(&self) -> Result<()> {
        let m = &self.ensemble.weights;
        check_weights("ensemble", &[m.ensemble, m.velocity, m.behavioral])?;

        let c = &self.composite.weights;
        check_weights("composite", &[c.patterns, c.ml, c.velocity, c.technical])?;

        let normalizer = self.composite.variance_normalizer;
        if !normalizer.is_finite() || normalizer <= 0.0 {
            return Err(Error::InvalidConfig(
                "composite.variance_normalizer must be positive".to_string(),
            ));
        }

        let d = &self.decision;
        if !(d.normal_threshold < d.caution_threshold
            && d.caution_threshold < d.flag_threshold
            && d.flag_threshold < d.block_threshold
            && d.block_threshold <= 100)
        {
            return Err(Error::InvalidConfig(format!(
                "decision thresholds must be strictly increasing: {} < {} < {} < {} <= 100",
                d.normal_threshold, d.caution_threshold, d.flag_threshold, d.block_threshold
            )));
        }

        if !(d.flag_threshold..=d.block_threshold).contains(&d.strict_rate_limit_threshold) {
            return Err(Error::InvalidConfig(format!(
                "strict_rate_limit_threshold {} must lie within [{}, {}]",
                d.strict_rate_limit_threshold, d.flag_threshold, d.block_threshold
            )));
        }

        if self.extraction.timeout_ms == 0 || self.patterns.load_timeout_ms == 0 {
            return Err(Error::InvalidConfig(
                "extraction.timeout_ms and patterns.load_timeout_ms must be positive".to_string(),
            ));
        }

        if self.extraction.min_timing_samples < 3 {
            return Err(Error::InvalidConfig(
                "extraction.min_timing_samples must be at least 3".to_string(),
            ));
        }

        Ok(())
    }
}

fn check_weights(section: &str, weights: &[f64]) -> Result<()> {
    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(Error::InvalidConfig(format!(
            "{} weights must be finite and non-negative",
            section
        )));
    }
    if weights.iter().sum::<f64>() <= 0.0 {
        return Err(Error::InvalidConfig(format!(
            "{} weights must not all be zero",
            section
        )));
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::InvalidConfig(format!("{} has invalid value {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.patterns.ttl(), Duration::from_secs(300));
        assert_eq!(config.patterns.load_timeout(), Duration::from_secs(1));
        assert_eq!(config.decision.block_threshold, 95);
        assert_eq!(config.extraction.retention(), chrono::Duration::hours(1));
    }

    #[test]
    fn test_rejects_zero_pattern_load_timeout() {
        let mut config = EngineConfig::default();
        config.patterns.load_timeout_ms = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_unordered_thresholds() {
        let mut config = EngineConfig::default();
        config.decision.flag_threshold = 96;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_zero_weights() {
        let mut config = EngineConfig::default();
        config.composite.weights = ComponentWeights {
            patterns: 0.0,
            ml: 0.0,
            velocity: 0.0,
            technical: 0.0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[patterns]
cache_ttl_secs = 60

[composite]
variance_normalizer = 2500.0
"#
        )
        .unwrap();

        let config = EngineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.patterns.cache_ttl_secs, 60);
        assert_eq!(config.composite.variance_normalizer, 2500.0);
        assert_eq!(config.composite.weights.patterns, 0.4);
        assert_eq!(config.extraction.timing_sample_size, 10);
    }
}
