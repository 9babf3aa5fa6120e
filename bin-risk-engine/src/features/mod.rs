//! Feature extraction
//!
//! Four independent extractors turn a [`RequestContext`] plus the lookup
//! history into a typed [`FeatureBundle`]. Extractors never abort an
//! evaluation: a failed or timed-out query yields the extractor's documented
//! fallback record and the extractor is listed in
//! [`FeatureBundle::degraded`].

pub mod behavioral;
pub mod geographic;
pub mod technical;
pub mod velocity;

use crate::store::EventStore;
use crate::types::RequestContext;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

pub use behavioral::{BehavioralExtractor, BehavioralFeatures};
pub use geographic::{GeographicExtractor, GeographicFeatures};
pub use technical::{TechnicalExtractor, TechnicalFeatures};
pub use velocity::{VelocityExtractor, VelocityFeatures};

/// Extractor name constants, used in logs, metrics and `degraded`
pub mod names {
    /// Velocity extractor
    pub const VELOCITY: &str = "velocity";
    /// Geographic extractor
    pub const GEOGRAPHIC: &str = "geographic";
    /// Behavioral extractor
    pub const BEHAVIORAL: &str = "behavioral";
    /// Technical extractor
    pub const TECHNICAL: &str = "technical";
}

/// Immutable per-evaluation feature snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureBundle {
    /// Request rate features
    pub velocity: VelocityFeatures,
    /// Location features
    pub geographic: GeographicFeatures,
    /// Client behavior features
    pub behavioral: BehavioralFeatures,
    /// BIN features
    pub technical: TechnicalFeatures,
    /// Extractors that fell back to their default record
    pub degraded: Vec<String>,
}

impl FeatureBundle {
    /// Whether the named extractor fell back to its default record
    pub fn is_degraded(&self, extractor: &str) -> bool {
        self.degraded.iter().any(|d| d == extractor)
    }

    /// Number of extractors that produced real data
    pub fn available_extractors(&self) -> usize {
        4usize.saturating_sub(self.degraded.len())
    }
}

/// One feature extractor.
///
/// `extract` may fail; the engine then uses `fallback`, which must not touch
/// any store.
#[async_trait]
pub trait FeatureExtractor: Send + Sync {
    /// Feature record produced
    type Output: Send;

    /// Extractor name
    fn name(&self) -> &'static str;

    /// Compute features from the context and lookup history
    async fn extract(&self, ctx: &RequestContext, store: &dyn EventStore) -> Result<Self::Output>;

    /// Neutral record used when `extract` fails or times out
    fn fallback(&self, ctx: &RequestContext) -> Self::Output;
}

/// Extractor output plus whether it is the fallback
#[derive(Debug, Clone)]
pub struct Extracted<T> {
    /// Feature record
    pub value: T,
    /// The record is the fallback
    pub degraded: bool,
}

/// Run one extractor under its own time budget, converting failure into the fallback
pub async fn run_extractor<E: FeatureExtractor>(
    extractor: &E,
    ctx: &RequestContext,
    store: &dyn EventStore,
    timeout: Duration,
) -> Extracted<E::Output> {
    let outcome = match tokio::time::timeout(timeout, extractor.extract(ctx, store)).await {
        Ok(result) => result,
        Err(_) => Err(Error::ExtractorTimeout {
            extractor: extractor.name(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    };

    match outcome {
        Ok(value) => Extracted {
            value,
            degraded: false,
        },
        Err(e) => {
            warn!(
                extractor = extractor.name(),
                session_id = %ctx.session_id,
                error = %e,
                "Feature extraction failed, using fallback"
            );
            Extracted {
                value: extractor.fallback(ctx),
                degraded: true,
            }
        }
    }
}

/// Map a store error into an extraction error for `extractor`
pub(crate) fn extraction_error(extractor: &'static str, err: Error) -> Error {
    match err {
        e @ Error::Extraction { .. } => e,
        other => Error::Extraction {
            extractor,
            reason: other.to_string(),
        },
    }
}
