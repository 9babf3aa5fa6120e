//! Geographic features: country spread and high-risk origin

use super::{extraction_error, names, FeatureExtractor};
use crate::config::{ExtractionConfig, SignalConfig};
use crate::store::{EventStore, Subject};
use crate::types::RequestContext;
use crate::Result;
use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Geographic feature record.
///
/// Fallback: no history (`country_changes = 0`, no impossible travel), with
/// `current_country` and `is_high_risk_country` still taken from the request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeographicFeatures {
    /// Distinct countries in the trailing window, current request included
    pub country_changes: u32,

    /// Country of this request
    pub current_country: String,

    /// Request country is in the high-risk set
    pub is_high_risk_country: bool,

    /// More distinct countries than a traveller could plausibly visit.
    /// A count-based proxy, not a distance/time computation.
    pub impossible_travel: bool,

    /// Countries seen in the window, sorted
    pub countries: Vec<String>,
}

impl GeographicFeatures {
    /// Geographic risk signal (0-1) used by the broad scorer
    pub fn risk_signal(&self) -> f64 {
        let mut signal = 0.0;
        if self.impossible_travel {
            signal += 0.6;
        }
        if self.is_high_risk_country {
            signal += 0.4;
        }
        signal += 0.1 * self.country_changes.saturating_sub(1) as f64;
        signal.clamp(0.0, 1.0)
    }
}

/// Counts distinct countries per user in the trailing hour
#[derive(Debug, Clone)]
pub struct GeographicExtractor {
    window: Duration,
    impossible_travel_countries: usize,
    high_risk_countries: HashSet<String>,
}

impl GeographicExtractor {
    /// Create extractor
    pub fn new(extraction: &ExtractionConfig, signals: &SignalConfig) -> Self {
        Self {
            window: Duration::seconds(extraction.geo_window_secs),
            impossible_travel_countries: extraction.impossible_travel_countries,
            high_risk_countries: signals
                .high_risk_countries
                .iter()
                .map(|c| c.trim().to_uppercase())
                .collect(),
        }
    }

    fn is_high_risk(&self, country: &str) -> bool {
        self.high_risk_countries.contains(country)
    }
}

#[async_trait]
impl FeatureExtractor for GeographicExtractor {
    type Output = GeographicFeatures;

    fn name(&self) -> &'static str {
        names::GEOGRAPHIC
    }

    async fn extract(&self, ctx: &RequestContext, store: &dyn EventStore) -> Result<GeographicFeatures> {
        let now = ctx.timestamp;
        let subject = match &ctx.user_id {
            Some(user) => Subject::User(user.clone()),
            None => Subject::Session(ctx.session_id.clone()),
        };

        let seen = store
            .distinct_countries(&subject, now - self.window, now)
            .await
            .map_err(|e| extraction_error(names::GEOGRAPHIC, e))?;

        let mut countries: BTreeSet<String> = seen.into_iter().map(|c| c.to_uppercase()).collect();
        if !ctx.country.is_empty() {
            countries.insert(ctx.country.clone());
        }

        let distinct = countries.len();
        Ok(GeographicFeatures {
            country_changes: distinct as u32,
            current_country: ctx.country.clone(),
            is_high_risk_country: self.is_high_risk(&ctx.country),
            impossible_travel: distinct > self.impossible_travel_countries,
            countries: countries.into_iter().collect(),
        })
    }

    fn fallback(&self, ctx: &RequestContext) -> GeographicFeatures {
        GeographicFeatures {
            country_changes: 0,
            current_country: ctx.country.clone(),
            is_high_risk_country: self.is_high_risk(&ctx.country),
            impossible_travel: false,
            countries: Vec::new(),
        }
    }
}
