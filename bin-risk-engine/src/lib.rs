//! Risk Engine for BIN lookups
//!
//! Real-time fraud and abuse scoring for BIN lookup requests. Each request is
//! turned into a feature bundle, matched against cached fraud patterns,
//! scored by a small model ensemble and blended into one composite score
//! that drives classification and mitigation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod composite;
pub mod config;
pub mod decision;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod metrics;
pub mod patterns;
pub mod store;
pub mod types;

pub use composite::{CompositeScore, CompositeScorer};
pub use config::EngineConfig;
pub use decision::DecisionController;
pub use engine::RiskEngine;
pub use ensemble::{ModelEnsemble, ModelOutput, RiskModel};
pub use error::{Error, Result};
pub use features::FeatureBundle;
pub use metrics::Metrics;
pub use patterns::{FraudPattern, PatternCache, PatternMatcher, PatternRule, PatternType};
pub use types::*;
