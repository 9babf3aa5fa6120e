//! Collaborator boundaries: event history, pattern source, session control, audit.
//!
//! The engine only reads from [`EventStore`] and [`PatternRepository`], and
//! only writes through [`SessionController`] and [`AuditStore`]. Everything
//! behind these traits is owned by other parts of the system.

pub mod file;
pub mod memory;

use crate::patterns::FraudPattern;
use crate::types::{AutomationAction, DetectionRecord};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use file::{JsonlAuditStore, TomlPatternRepository};
pub use memory::{MemoryAuditStore, MemoryEventStore, MemoryPatternRepository, MemorySessionController};

/// Key an event history is queried by
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    /// Anonymous session
    Session(String),
    /// Authenticated user
    User(String),
    /// Client IP
    Ip(String),
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Session(id) => write!(f, "session:{}", id),
            Subject::User(id) => write!(f, "user:{}", id),
            Subject::Ip(ip) => write!(f, "ip:{}", ip),
        }
    }
}

/// One logged lookup, as written by the request-logging middleware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupEvent {
    /// Session id
    pub session_id: String,
    /// User id, if authenticated
    pub user_id: Option<String>,
    /// Client IP
    pub ip: String,
    /// Request country
    pub country: String,
    /// Requested BIN
    pub bin: String,
    /// Request time
    pub timestamp: DateTime<Utc>,
}

impl LookupEvent {
    /// Whether this event belongs to `subject`
    pub fn matches(&self, subject: &Subject) -> bool {
        match subject {
            Subject::Session(id) => &self.session_id == id,
            Subject::User(id) => self.user_id.as_deref() == Some(id.as_str()),
            Subject::Ip(ip) => &self.ip == ip,
        }
    }
}

/// Read side of the append-only lookup history.
///
/// Windows are half-open: `(since, until]`.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Number of events for `subject` in the window
    async fn count_events(
        &self,
        subject: &Subject,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64>;

    /// Distinct countries seen for `subject` in the window, sorted
    async fn distinct_countries(
        &self,
        subject: &Subject,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<String>>;

    /// The `limit` most recent timestamps at or before `until`, oldest first
    async fn recent_timestamps(
        &self,
        subject: &Subject,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<DateTime<Utc>>>;

    /// Earliest event for `subject`
    async fn first_seen(&self, subject: &Subject) -> Result<Option<DateTime<Utc>>>;
}

/// Source of truth for fraud patterns
#[async_trait]
pub trait PatternRepository: Send + Sync {
    /// All currently active patterns
    async fn active_patterns(&self) -> Result<Vec<FraudPattern>>;
}

/// Session and rate-limit mitigation primitives.
///
/// Both calls must be idempotent.
#[async_trait]
pub trait SessionController: Send + Sync {
    /// Block the session; blocking an already-blocked session is a no-op
    async fn block_session(&self, session_id: &str) -> Result<()>;

    /// Apply stricter rate limits to the session
    async fn apply_strict_rate_limits(&self, session_id: &str) -> Result<()>;
}

/// Append-only audit sink
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Persist a detection record
    async fn append_detection(&self, record: &DetectionRecord) -> Result<()>;

    /// Persist a mitigation action
    async fn append_action(&self, action: &AutomationAction) -> Result<()>;
}
