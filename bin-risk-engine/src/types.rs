//! Core types for the risk engine

use crate::features::FeatureBundle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Inbound BIN lookup to be evaluated, as assembled by the API layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskEvaluationRequest {
    /// Caller session id
    pub session_id: String,

    /// Authenticated user, if any
    #[serde(default)]
    pub user_id: Option<String>,

    /// Requested BIN (raw, as typed by the caller)
    pub bin: String,

    /// Client IP address
    pub ip: String,

    /// User-Agent header
    #[serde(default)]
    pub user_agent: Option<String>,

    /// ISO 3166 alpha-2 country of the request
    pub country: String,

    /// Request time
    pub timestamp: DateTime<Utc>,
}

/// Normalized per-evaluation context. Ephemeral, one per evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Caller session id
    pub session_id: String,
    /// Authenticated user, if any
    pub user_id: Option<String>,
    /// Requested BIN (trimmed)
    pub bin: String,
    /// Client IP address
    pub ip: String,
    /// User-Agent, `None` when missing or blank
    pub user_agent: Option<String>,
    /// Upper-cased country code
    pub country: String,
    /// Request time, used as "now" for every trailing window
    pub timestamp: DateTime<Utc>,
}

impl From<RiskEvaluationRequest> for RequestContext {
    fn from(req: RiskEvaluationRequest) -> Self {
        let user_agent = req
            .user_agent
            .map(|ua| ua.trim().to_string())
            .filter(|ua| !ua.is_empty());
        let user_id = req
            .user_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        Self {
            session_id: req.session_id.trim().to_string(),
            user_id,
            bin: req.bin.trim().to_string(),
            ip: req.ip.trim().to_string(),
            user_agent,
            country: req.country.trim().to_uppercase(),
            timestamp: req.timestamp,
        }
    }
}

/// Risk score (0-100)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RiskScore(u8);

impl RiskScore {
    /// Create new risk score (0-100)
    pub fn new(score: u8) -> Self {
        Self(score.min(100))
    }

    /// Round a composite score into the 0-100 integer range
    pub fn from_composite(composite: f64) -> Self {
        if !composite.is_finite() {
            return Self(50);
        }
        Self(composite.round().clamp(0.0, 100.0) as u8)
    }

    /// Get raw score
    pub fn score(&self) -> u8 {
        self.0
    }
}

/// Decision class derived from the risk score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskClass {
    /// Proceed
    LowRisk,
    /// Standard processing
    Normal,
    /// Heightened monitoring only
    Caution,
    /// Additional verification, raise monitoring
    Flagged,
    /// Reject and send to manual review
    Blocked,
}

impl RiskClass {
    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskClass::LowRisk => "low_risk",
            RiskClass::Normal => "normal",
            RiskClass::Caution => "caution",
            RiskClass::Flagged => "flagged",
            RiskClass::Blocked => "blocked",
        }
    }
}

/// Recommended handling for the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    /// Reject the request
    Reject,
    /// Queue for manual review
    ManualReview,
    /// Require additional verification before serving
    AdditionalVerification,
    /// Raise monitoring level for the session
    IncreaseMonitoring,
    /// Keep serving, monitor more closely
    HeightenedMonitoring,
    /// Standard processing
    StandardProcessing,
    /// Proceed without restriction
    Proceed,
    /// Assessment is low-confidence; treat with care
    LowConfidenceReview,
}

/// Per-component scores that fed the composite
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentBreakdown {
    /// Pattern matcher score, absent when no pattern could be evaluated
    pub pattern_score: Option<f64>,
    /// Model ensemble score
    pub ml_score: f64,
    /// Model ensemble confidence
    pub ml_confidence: f64,
    /// Direct velocity risk, absent when the velocity extractor degraded
    pub velocity_score: Option<f64>,
    /// Direct technical risk, absent when the technical extractor degraded
    pub technical_score: Option<f64>,
    /// Ids of matched patterns
    pub matched_patterns: Vec<String>,
    /// Extractors that fell back to their default bundle
    pub degraded_extractors: Vec<String>,
}

/// Risk assessment result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Rounded composite score
    pub risk_score: RiskScore,

    /// Unrounded composite score
    pub composite_score: f64,

    /// Confidence in the score (0-1)
    pub confidence: f64,

    /// Decision class
    pub risk_class: RiskClass,

    /// Risk factors detected
    pub risk_factors: Vec<String>,

    /// Recommended handling
    pub recommendations: Vec<Recommendation>,

    /// Whether the session was blocked
    pub is_blocked: bool,

    /// Component breakdown
    pub breakdown: ComponentBreakdown,

    /// Assessment timestamp (the request time)
    pub assessed_at: DateTime<Utc>,
}

/// Append-only audit entry, one per evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionRecord {
    /// Record id
    pub id: Uuid,
    /// Session evaluated
    pub session_id: String,
    /// User evaluated
    pub user_id: Option<String>,
    /// BIN as requested
    pub bin: String,
    /// Rounded score
    pub score: u8,
    /// Confidence
    pub confidence: f64,
    /// Decision class
    pub risk_class: RiskClass,
    /// Matched pattern ids
    pub matched_patterns: Vec<String>,
    /// Features the decision was based on
    pub feature_snapshot: FeatureBundle,
    /// Score reached the flag threshold
    pub flagged: bool,
    /// Creation time
    pub timestamp: DateTime<Utc>,
}

/// Mitigation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Session blocked
    Block,
    /// Strict rate limits applied
    RateLimit,
    /// Monitoring raised, no collaborator call
    Monitor,
}

impl ActionKind {
    /// Stable label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Block => "block",
            ActionKind::RateLimit => "rate_limit",
            ActionKind::Monitor => "monitor",
        }
    }
}

/// Mitigation action linked to a detection record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationAction {
    /// Action id
    pub id: Uuid,
    /// Detection record this action belongs to
    pub detection_id: Uuid,
    /// Session acted upon
    pub session_id: String,
    /// What was done
    pub kind: ActionKind,
    /// Whether the collaborator call succeeded
    pub succeeded: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_score_rounding() {
        assert_eq!(RiskScore::from_composite(94.4).score(), 94);
        assert_eq!(RiskScore::from_composite(94.5).score(), 95);
        assert_eq!(RiskScore::from_composite(-3.0).score(), 0);
        assert_eq!(RiskScore::from_composite(140.0).score(), 100);
        assert_eq!(RiskScore::from_composite(f64::NAN).score(), 50);
        assert_eq!(RiskScore::new(250).score(), 100);
    }

    #[test]
    fn test_context_normalization() {
        let ctx = RequestContext::from(RiskEvaluationRequest {
            session_id: " s1 ".to_string(),
            user_id: Some("".to_string()),
            bin: " 411111 ".to_string(),
            ip: "10.0.0.1".to_string(),
            user_agent: Some("   ".to_string()),
            country: "us".to_string(),
            timestamp: Utc::now(),
        });

        assert_eq!(ctx.session_id, "s1");
        assert_eq!(ctx.user_id, None);
        assert_eq!(ctx.bin, "411111");
        assert_eq!(ctx.user_agent, None);
        assert_eq!(ctx.country, "US");
    }

    #[test]
    fn test_class_ordering() {
        assert!(RiskClass::Blocked > RiskClass::Flagged);
        assert!(RiskClass::Flagged > RiskClass::Caution);
        assert!(RiskClass::Normal > RiskClass::LowRisk);
    }
}
