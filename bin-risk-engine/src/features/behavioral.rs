//! Behavioral features: user-agent signatures and request timing regularity

use super::{extraction_error, names, FeatureExtractor};
use crate::config::{ExtractionConfig, SignalConfig};
use crate::store::{EventStore, Subject};
use crate::types::RequestContext;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Suspicious-pattern tags emitted by the behavioral extractor
pub mod tags {
    /// No User-Agent header
    pub const MISSING_USER_AGENT: &str = "missing_user_agent";
    /// Prefix for automation tool signatures, followed by the signature
    pub const BOT_USER_AGENT: &str = "bot_user_agent";
    /// Suspiciously short User-Agent
    pub const MINIMAL_USER_AGENT: &str = "minimal_user_agent";
    /// Browser too old for real traffic
    pub const OUTDATED_BROWSER: &str = "outdated_browser";
    /// Machine-regular request spacing
    pub const UNIFORM_TIMING: &str = "uniform_request_timing";
}

/// Timing consistency at or above this is tagged as uniform
const UNIFORM_TIMING_THRESHOLD: f64 = 0.9;

/// Behavioral feature record.
///
/// Fallback: user-agent analysis of the request itself, with no history
/// (`timing_consistency = 0`, `request_count = 0`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BehavioralFeatures {
    /// Request carried a User-Agent
    pub has_user_agent: bool,

    /// 0-1, high when inter-request intervals barely vary
    pub timing_consistency: f64,

    /// Tags from [`tags`]
    pub suspicious_patterns: Vec<String>,

    /// Lookups by the user (or session) in the trailing behavior window
    pub request_count: u64,
}

impl BehavioralFeatures {
    /// Suspicious patterns other than the missing user agent
    pub fn extra_pattern_count(&self) -> usize {
        self.suspicious_patterns
            .iter()
            .filter(|p| p.as_str() != tags::MISSING_USER_AGENT)
            .count()
    }

    /// Bot signatures matched in the User-Agent
    pub fn bot_signatures(&self) -> impl Iterator<Item = &str> {
        self.suspicious_patterns.iter().filter_map(|p| {
            p.strip_prefix(tags::BOT_USER_AGENT)
                .and_then(|rest| rest.strip_prefix(':'))
        })
    }

    /// Whether a tag is present
    pub fn has_pattern(&self, tag: &str) -> bool {
        self.suspicious_patterns.iter().any(|p| p == tag)
    }

    /// Behavioral risk signal (0-1) used by the broad scorer
    pub fn risk_signal(&self) -> f64 {
        let mut signal = 0.0;
        if !self.has_user_agent {
            signal += 0.5;
        }
        signal += 0.15 * self.extra_pattern_count() as f64;
        signal += 0.35 * self.timing_consistency;
        signal.clamp(0.0, 1.0)
    }
}

/// Timing consistency of a timestamp series: `max(0, 1 - cv)` of its intervals,
/// where `cv` is the coefficient of variation. 0 with fewer than `min_samples`
/// timestamps.
pub fn timing_consistency(timestamps: &[DateTime<Utc>], min_samples: usize) -> f64 {
    if timestamps.len() < min_samples.max(3) {
        return 0.0;
    }

    let intervals: Vec<f64> = timestamps
        .windows(2)
        .map(|w| (w[1] - w[0]).num_milliseconds().abs() as f64)
        .collect();

    let n = intervals.len() as f64;
    let mean = intervals.iter().sum::<f64>() / n;
    if mean <= 0.0 {
        // Every request at the same instant
        return 1.0;
    }

    let variance = intervals.iter().map(|i| (i - mean).powi(2)).sum::<f64>() / n;
    let cv = variance.sqrt() / mean;
    (1.0 - cv).clamp(0.0, 1.0)
}

/// Analyses the User-Agent and the spacing of recent requests
#[derive(Debug, Clone)]
pub struct BehavioralExtractor {
    window: Duration,
    sample_size: usize,
    min_samples: usize,
    bot_signatures: Vec<String>,
    minimal_user_agent_len: usize,
    outdated_browsers: Vec<String>,
}

impl BehavioralExtractor {
    /// Create extractor
    pub fn new(extraction: &ExtractionConfig, signals: &SignalConfig) -> Self {
        Self {
            window: Duration::seconds(extraction.behavior_window_secs),
            sample_size: extraction.timing_sample_size,
            min_samples: extraction.min_timing_samples,
            bot_signatures: signals.bot_signatures.iter().map(|s| s.to_lowercase()).collect(),
            minimal_user_agent_len: signals.minimal_user_agent_len,
            outdated_browsers: signals.outdated_browsers.iter().map(|s| s.to_lowercase()).collect(),
        }
    }

    /// User-agent tags for a request
    pub fn user_agent_patterns(&self, user_agent: Option<&str>) -> Vec<String> {
        let Some(ua) = user_agent else {
            return vec![tags::MISSING_USER_AGENT.to_string()];
        };

        let lower = ua.to_lowercase();
        let mut patterns: Vec<String> = self
            .bot_signatures
            .iter()
            .filter(|sig| lower.contains(sig.as_str()))
            .map(|sig| format!("{}:{}", tags::BOT_USER_AGENT, sig))
            .collect();

        if ua.chars().count() < self.minimal_user_agent_len {
            patterns.push(tags::MINIMAL_USER_AGENT.to_string());
        }

        if self.outdated_browsers.iter().any(|old| lower.contains(old.as_str())) {
            patterns.push(tags::OUTDATED_BROWSER.to_string());
        }

        patterns
    }
}

#[async_trait]
impl FeatureExtractor for BehavioralExtractor {
    type Output = BehavioralFeatures;

    fn name(&self) -> &'static str {
        names::BEHAVIORAL
    }

    async fn extract(&self, ctx: &RequestContext, store: &dyn EventStore) -> Result<BehavioralFeatures> {
        let now = ctx.timestamp;
        let subject = match &ctx.user_id {
            Some(user) => Subject::User(user.clone()),
            None => Subject::Session(ctx.session_id.clone()),
        };

        let (timestamps, request_count) = tokio::try_join!(
            store.recent_timestamps(&subject, now, self.sample_size),
            store.count_events(&subject, now - self.window, now),
        )
        .map_err(|e| extraction_error(names::BEHAVIORAL, e))?;

        let consistency = timing_consistency(&timestamps, self.min_samples);
        let mut suspicious_patterns = self.user_agent_patterns(ctx.user_agent.as_deref());
        if consistency >= UNIFORM_TIMING_THRESHOLD {
            suspicious_patterns.push(tags::UNIFORM_TIMING.to_string());
        }

        Ok(BehavioralFeatures {
            has_user_agent: ctx.user_agent.is_some(),
            timing_consistency: consistency,
            suspicious_patterns,
            request_count,
        })
    }

    fn fallback(&self, ctx: &RequestContext) -> BehavioralFeatures {
        BehavioralFeatures {
            has_user_agent: ctx.user_agent.is_some(),
            timing_consistency: 0.0,
            suspicious_patterns: self.user_agent_patterns(ctx.user_agent.as_deref()),
            request_count: 0,
        }
    }
}
