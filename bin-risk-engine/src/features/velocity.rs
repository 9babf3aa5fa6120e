//! Velocity features: lookup rate per subject and request rate per IP

use super::{extraction_error, names, FeatureExtractor};
use crate::config::ExtractionConfig;
use crate::store::{EventStore, Subject};
use crate::types::RequestContext;
use crate::Result;
use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Velocity feature record. Fallback: all zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VelocityFeatures {
    /// Lookups by the user (or session) in the trailing minute
    pub lookups_per_minute: u64,

    /// Requests from the IP in the trailing second
    pub requests_per_second: u64,

    /// Seconds since the session's first lookup, 0 for a new session
    pub session_age_secs: i64,
}

impl VelocityFeatures {
    /// Direct velocity risk (0-100), independent of the ensemble
    pub fn risk(&self) -> f64 {
        // 100+/min is card-testing velocity on its own
        let mut score = match self.lookups_per_minute {
            n if n >= 100 => 100.0,
            n if n >= 50 => 60.0,
            n if n >= 20 => 30.0,
            n if n >= 10 => 15.0,
            _ => 0.0,
        };

        score += match self.requests_per_second {
            n if n >= 10 => 25.0,
            n if n >= 5 => 15.0,
            n if n >= 2 => 10.0,
            _ => 0.0,
        };

        // Young session already bursting
        if self.session_age_secs < 60 && self.lookups_per_minute >= 10 {
            score += 10.0;
        }

        f64::min(score, 100.0)
    }
}

/// Counts lookups in the trailing minute and second
#[derive(Debug, Clone)]
pub struct VelocityExtractor {
    window: Duration,
    burst_window: Duration,
}

impl VelocityExtractor {
    /// Create extractor from the extraction windows
    pub fn new(config: &ExtractionConfig) -> Self {
        Self {
            window: Duration::seconds(config.velocity_window_secs),
            burst_window: Duration::seconds(config.burst_window_secs),
        }
    }
}

#[async_trait]
impl FeatureExtractor for VelocityExtractor {
    type Output = VelocityFeatures;

    fn name(&self) -> &'static str {
        names::VELOCITY
    }

    async fn extract(&self, ctx: &RequestContext, store: &dyn EventStore) -> Result<VelocityFeatures> {
        let now = ctx.timestamp;
        let subject = match &ctx.user_id {
            Some(user) => Subject::User(user.clone()),
            None => Subject::Session(ctx.session_id.clone()),
        };
        let ip = Subject::Ip(ctx.ip.clone());
        let session = Subject::Session(ctx.session_id.clone());

        let (lookups, requests, first_seen) = tokio::try_join!(
            store.count_events(&subject, now - self.window, now),
            store.count_events(&ip, now - self.burst_window, now),
            store.first_seen(&session),
        )
        .map_err(|e| extraction_error(names::VELOCITY, e))?;

        let session_age_secs = first_seen
            .map(|first| (now - first).num_seconds().max(0))
            .unwrap_or(0);

        Ok(VelocityFeatures {
            lookups_per_minute: lookups,
            requests_per_second: requests,
            session_age_secs,
        })
    }

    fn fallback(&self, _ctx: &RequestContext) -> VelocityFeatures {
        VelocityFeatures::default()
    }
}
