//! Fraud patterns: versioned, parameterized rules evaluated against a feature bundle

pub mod cache;
pub mod matcher;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use cache::PatternCache;
pub use matcher::{PatternMatch, PatternMatcher, PatternScore};

/// Active patterns keyed by id
pub type PatternSet = BTreeMap<String, FraudPattern>;

/// Feature family a pattern inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Request rates
    Velocity,
    /// Country spread
    Geographic,
    /// Client behavior
    Behavioral,
    /// BIN properties
    Technical,
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternType::Velocity => write!(f, "velocity"),
            PatternType::Geographic => write!(f, "geographic"),
            PatternType::Behavioral => write!(f, "behavioral"),
            PatternType::Technical => write!(f, "technical"),
        }
    }
}

/// Rule parameters, tagged by pattern type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternRule {
    /// Lookup or request rate above a ceiling
    Velocity {
        /// Lookups per minute ceiling
        max_lookups_per_minute: u64,
        /// Requests per second ceiling
        max_requests_per_second: u64,
    },
    /// Too many countries, or a high-risk origin.
    /// Impossible travel always matches.
    Geographic {
        /// Distinct countries tolerated in the window
        max_distinct_countries: u32,
        /// Match requests from high-risk countries
        flag_high_risk_country: bool,
    },
    /// Automation signatures
    Behavioral {
        /// Timing consistency at or above this matches
        min_timing_consistency: f64,
        /// Match requests without a User-Agent
        flag_missing_user_agent: bool,
        /// Match known automation User-Agents
        flag_bot_user_agent: bool,
    },
    /// Card-testing signatures
    Technical {
        /// Match known test BINs
        flag_test_bin: bool,
        /// Match BINs failing the Luhn check
        flag_invalid_luhn: bool,
        /// Match BINs in suspicious ranges
        flag_suspicious_range: bool,
    },
}

impl PatternRule {
    /// Pattern type of this rule
    pub fn pattern_type(&self) -> PatternType {
        match self {
            PatternRule::Velocity { .. } => PatternType::Velocity,
            PatternRule::Geographic { .. } => PatternType::Geographic,
            PatternRule::Behavioral { .. } => PatternType::Behavioral,
            PatternRule::Technical { .. } => PatternType::Technical,
        }
    }
}

fn default_version() -> u32 {
    1
}

fn default_active() -> bool {
    true
}

/// Named fraud rule as served by the pattern repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FraudPattern {
    /// Stable id
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Rule version, bumped by authoring tooling
    #[serde(default = "default_version")]
    pub version: u32,

    /// Rule parameters
    pub rule: PatternRule,

    /// Risk contributed at full match confidence (0-100)
    pub risk_weight: f64,

    /// Only active patterns are served
    #[serde(default = "default_active")]
    pub active: bool,
}

impl FraudPattern {
    /// Create an active version-1 pattern
    pub fn new(id: &str, name: &str, rule: PatternRule, risk_weight: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            version: 1,
            rule,
            risk_weight,
            active: true,
        }
    }

    /// Pattern type
    pub fn pattern_type(&self) -> PatternType {
        self.rule.pattern_type()
    }

    /// Seed pattern set for deployments without a pattern repository
    pub fn default_set() -> Vec<FraudPattern> {
        vec![
            FraudPattern::new(
                "velocity-burst",
                "Lookup burst",
                PatternRule::Velocity {
                    max_lookups_per_minute: 60,
                    max_requests_per_second: 5,
                },
                95.0,
            ),
            FraudPattern::new(
                "geo-hopping",
                "Country hopping",
                PatternRule::Geographic {
                    max_distinct_countries: 2,
                    flag_high_risk_country: true,
                },
                75.0,
            ),
            FraudPattern::new(
                "automation-signature",
                "Automated client",
                PatternRule::Behavioral {
                    min_timing_consistency: 0.8,
                    flag_missing_user_agent: true,
                    flag_bot_user_agent: true,
                },
                85.0,
            ),
            FraudPattern::new(
                "card-testing",
                "Card testing",
                PatternRule::Technical {
                    flag_test_bin: false,
                    flag_invalid_luhn: true,
                    flag_suspicious_range: true,
                },
                70.0,
            ),
        ]
    }
}
